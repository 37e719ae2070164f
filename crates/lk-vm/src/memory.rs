use crate::error::MemoryError;

/// Start of the data region; text lives below it at address 0.
pub const DATA_BASE: u32 = 0x1000_0000;

/// Virtual memory address
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtAddr(u32);

impl VirtAddr {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn val(&self) -> u32 {
        self.0
    }
}

/// Word-addressed data RAM shared by every hart.
#[derive(Debug, Clone)]
pub struct Memory {
    words: Vec<u32>,
}

impl Memory {
    pub fn new(words: usize) -> Self {
        Self {
            words: vec![0; words],
        }
    }

    pub fn size_bytes(&self) -> u32 {
        (self.words.len() * 4) as u32
    }

    fn index(&self, addr: u32) -> Result<usize, MemoryError> {
        if addr % 4 != 0 {
            return Err(MemoryError::Misaligned { addr, alignment: 4 });
        }
        let offset = addr
            .checked_sub(DATA_BASE)
            .ok_or(MemoryError::OutOfBounds(addr))?;
        let index = (offset / 4) as usize;
        if index >= self.words.len() {
            return Err(MemoryError::OutOfBounds(addr));
        }
        Ok(index)
    }

    pub fn read_word(&self, addr: u32) -> Result<u32, MemoryError> {
        self.index(addr).map(|i| self.words[i])
    }

    pub fn write_word(&mut self, addr: u32, val: u32) -> Result<(), MemoryError> {
        let i = self.index(addr)?;
        self.words[i] = val;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_round_trip_inside_the_data_region() {
        let mut mem = Memory::new(16);
        mem.write_word(DATA_BASE + 8, 0xdead_beef).unwrap();
        assert_eq!(mem.read_word(DATA_BASE + 8).unwrap(), 0xdead_beef);
    }

    #[test]
    fn rejects_text_and_past_the_end() {
        let mem = Memory::new(4);
        assert!(matches!(mem.read_word(0x40), Err(MemoryError::OutOfBounds(0x40))));
        assert!(matches!(
            mem.read_word(DATA_BASE + 16),
            Err(MemoryError::OutOfBounds(_))
        ));
        assert!(matches!(
            mem.read_word(DATA_BASE + 2),
            Err(MemoryError::Misaligned { alignment: 4, .. })
        ));
    }
}
