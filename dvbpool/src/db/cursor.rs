//! Bidirectional cursor over an ordered frequency axis.
//!
//! Fuzzy mux lookups walk backward to the bottom of a possibly
//! overlapping frequency range and then forward through it, so a plain
//! iterator is not enough. The cursor materialises the ordered row set
//! for one index prefix inside the enclosing transaction and then
//! supports seeking and stepping in both directions.

/// Seek mode for positioning a cursor on the frequency axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seek {
    Eq,
    Leq,
    Geq,
}

pub struct FreqCursor<T> {
    rows: Vec<T>,
    pos: Option<usize>,
    freq_of: fn(&T) -> u32,
}

impl<T> FreqCursor<T> {
    /// `rows` must be sorted ascending by `freq_of`.
    pub fn new(rows: Vec<T>, freq_of: fn(&T) -> u32) -> Self {
        Self {
            rows,
            pos: None,
            freq_of,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.pos.is_some()
    }

    pub fn pos(&self) -> Option<usize> {
        self.pos
    }

    /// Restore a previously remembered position.
    pub fn set_pos(&mut self, pos: Option<usize>) {
        self.pos = pos.filter(|&p| p < self.rows.len());
    }

    pub fn current(&self) -> Option<&T> {
        self.pos.map(|p| &self.rows[p])
    }

    /// Step toward higher frequencies; invalidates past the end.
    pub fn next(&mut self) {
        self.pos = match self.pos {
            Some(p) if p + 1 < self.rows.len() => Some(p + 1),
            _ => None,
        };
    }

    /// Step toward lower frequencies; invalidates past the start.
    pub fn prev(&mut self) {
        self.pos = match self.pos {
            Some(p) if p > 0 => Some(p - 1),
            _ => None,
        };
    }

    /// Position the cursor relative to `frequency`. `Leq` lands on the
    /// last row at or below it, `Geq` on the first row at or above it,
    /// `Eq` only on an exact hit. Returns validity.
    pub fn seek(&mut self, mode: Seek, frequency: u32) -> bool {
        // First index with row frequency > target.
        let upper = self
            .rows
            .partition_point(|r| (self.freq_of)(r) <= frequency);
        self.pos = match mode {
            Seek::Leq => upper.checked_sub(1),
            Seek::Geq => {
                let lower = self
                    .rows
                    .partition_point(|r| (self.freq_of)(r) < frequency);
                (lower < self.rows.len()).then_some(lower)
            }
            Seek::Eq => upper
                .checked_sub(1)
                .filter(|&p| (self.freq_of)(&self.rows[p]) == frequency),
        };
        self.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(freqs: &[u32]) -> FreqCursor<u32> {
        FreqCursor::new(freqs.to_vec(), |f| *f)
    }

    #[test]
    fn seek_leq_lands_on_floor() {
        let mut c = cursor(&[100, 200, 300]);
        assert!(c.seek(Seek::Leq, 250));
        assert_eq!(c.current(), Some(&200));
        assert!(c.seek(Seek::Leq, 300));
        assert_eq!(c.current(), Some(&300));
        assert!(!c.seek(Seek::Leq, 99));
    }

    #[test]
    fn seek_geq_lands_on_ceiling() {
        let mut c = cursor(&[100, 200, 300]);
        assert!(c.seek(Seek::Geq, 150));
        assert_eq!(c.current(), Some(&200));
        assert!(!c.seek(Seek::Geq, 301));
    }

    #[test]
    fn stepping_past_either_end_invalidates() {
        let mut c = cursor(&[100, 200]);
        c.seek(Seek::Leq, 100);
        c.prev();
        assert!(!c.is_valid());
        c.seek(Seek::Geq, 200);
        c.next();
        assert!(!c.is_valid());
    }

    #[test]
    fn remembered_position_can_be_restored() {
        let mut c = cursor(&[100, 200, 300]);
        c.seek(Seek::Leq, 200);
        let saved = c.pos();
        c.prev();
        c.prev();
        assert!(!c.is_valid());
        c.set_pos(saved);
        assert_eq!(c.current(), Some(&200));
    }
}
