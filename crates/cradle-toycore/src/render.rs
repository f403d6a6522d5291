use std::sync::{Mutex, MutexGuard};

use cradle_mem::SharedRam;

/// Bytes of main RAM the renderer samples each frame.
pub const LATCH_LEN: usize = 0x1000;

/// Per-frame render inputs, copied from guest memory before the worker starts so the worker
/// never reads memory the processors are writing.
#[derive(Debug, Clone, Default)]
struct Latch {
    frame: u64,
    source: Vec<u8>,
}

/// The part of the machine the render worker touches.
#[derive(Debug)]
pub struct Renderer {
    latch: Mutex<Latch>,
    vram: SharedRam,
}

impl Renderer {
    pub fn new(vram: SharedRam) -> Self {
        Self {
            latch: Mutex::new(Latch::default()),
            vram,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Latch> {
        match self.latch.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn latch(&self, frame: u64, main: &SharedRam) {
        let mut latch = self.lock();
        latch.frame = frame;
        latch.source = main.with(|ram| ram[..LATCH_LEN.min(ram.len())].to_vec());
    }

    /// Draws the latched frame into VRAM. Same output whether run inline or on the worker.
    pub fn render(&self) {
        let latch = self.lock();
        if latch.source.is_empty() {
            return;
        }
        let src = &latch.source;
        let frame = latch.frame as u8;
        self.vram.with_mut(|vram| {
            let mut carry = frame;
            for (i, px) in vram.iter_mut().enumerate() {
                let s = src[i % src.len()];
                carry = carry.rotate_left(3) ^ s;
                *px = px.wrapping_add(carry) ^ (i as u8);
            }
        });
    }
}
