use crate::error::{KResult, KernelError};

/// Bytes at the low end of a stack that must never be written.
pub const STACK_BOUNDS_PADDING: usize = 64;
const FILL: u8 = 0x99;

/// A thread's stack. The address range is synthetic: simulated threads get
/// a unique stack pointer per thread, while the backing bytes live here so
/// overruns can be detected.
#[derive(Debug)]
pub struct ThreadStack {
    base: u32,
    bytes: Vec<u8>,
    bounds_checked: bool,
}

impl ThreadStack {
    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn top(&self) -> u32 {
        self.base + self.bytes.len() as u32
    }

    /// Mutable view of the stack contents, lowest address first.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// False if anything scribbled on the guard padding.
    pub fn padding_intact(&self) -> bool {
        !self.bounds_checked
            || self.bytes[..STACK_BOUNDS_PADDING.min(self.bytes.len())]
                .iter()
                .all(|&b| b == FILL)
    }

    /// Deepest point ever touched, as bytes from the top. Only meaningful
    /// for bounds-checked stacks, which are pre-filled.
    pub fn high_water(&self) -> usize {
        if !self.bounds_checked {
            return 0;
        }
        let untouched = self.bytes.iter().take_while(|&&b| b == FILL).count();
        self.bytes.len() - untouched
    }
}

/// Hands out stacks from a fixed budget.
#[derive(Debug)]
pub struct StackAllocator {
    remaining: usize,
    next_base: u32,
}

const STACK_REGION_BASE: u32 = 0x8000_0000;

impl StackAllocator {
    pub fn new(pool_bytes: usize) -> Self {
        Self {
            remaining: pool_bytes,
            next_base: STACK_REGION_BASE,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn alloc(&mut self, size: usize, bounds_checked: bool) -> KResult<ThreadStack> {
        if size == 0 {
            return Err(KernelError::InvalidArgs);
        }
        let size = size.next_multiple_of(16);
        if size > self.remaining {
            return Err(KernelError::NoMemory);
        }
        let base = self.next_base;
        self.next_base = base
            .checked_add(size as u32)
            .ok_or(KernelError::NoMemory)?;
        self.remaining -= size;
        let fill = if bounds_checked { FILL } else { 0 };
        Ok(ThreadStack {
            base,
            bytes: vec![fill; size],
            bounds_checked,
        })
    }

    pub fn free(&mut self, stack: ThreadStack) {
        self.remaining += stack.size();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_runs_dry() {
        let mut pool = StackAllocator::new(512);
        let a = pool.alloc(256, false).unwrap();
        let _b = pool.alloc(256, false).unwrap();
        assert_eq!(pool.alloc(16, false).unwrap_err(), KernelError::NoMemory);
        pool.free(a);
        assert!(pool.alloc(200, false).is_ok());
    }

    #[test]
    fn stacks_do_not_overlap() {
        let mut pool = StackAllocator::new(4096);
        let a = pool.alloc(100, false).unwrap();
        let b = pool.alloc(100, false).unwrap();
        assert_eq!(a.size(), 112);
        assert!(a.top() <= b.base());
    }

    #[test]
    fn padding_detects_overrun() {
        let mut pool = StackAllocator::new(4096);
        let mut stack = pool.alloc(1024, true).unwrap();
        assert!(stack.padding_intact());
        assert_eq!(stack.high_water(), 0);
        let len = stack.size();
        stack.bytes_mut()[len - 8..].fill(0);
        assert_eq!(stack.high_water(), 8);
        assert!(stack.padding_intact());
        stack.bytes_mut()[3] = 0;
        assert!(!stack.padding_intact());
    }
}
