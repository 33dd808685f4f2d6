use std::collections::VecDeque;

use indexmap::IndexMap;

use super::static_table::{DYNAMIC_START_INDEX, STATIC_TABLE};

/// Per RFC 7541 section 4.1: every dynamic table entry costs its name and
/// value octet lengths plus this much overhead.
const ENTRY_SIZE_EXTRA: u32 = 32;

const DEFAULT_TABLE_SIZE: u32 = 4096;

/// Whether a table is driving an encoder or a decoder. Only encoders need
/// the name index (decoders only ever look an index *up*, they never need
/// to find one for a name they're about to emit).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Encoder,
    Decoder,
}

struct NameIndex {
    /// Insertion sequence of the newest dynamic-table entry with this
    /// name, or `None` if the name is no longer present in the dynamic
    /// table.
    dynamic_seq: Option<u64>,
    /// Position of this name in the static table, or `None`.
    static_pos: Option<usize>,
}

/// HPACK header table: the static table plus a size-bounded, FIFO dynamic
/// table, with an auxiliary name index so an encoder can find a reusable
/// index for a header name in O(1) instead of scanning the dynamic table.
pub struct HpackTable {
    mode: Mode,
    dynamic: VecDeque<(String, String)>,
    table_size: u32,
    limit_size: u32,
    max_size: u32,
    index_sequence: u64,
    name_index: IndexMap<String, NameIndex>,
}

impl HpackTable {
    pub fn new(mode: Mode) -> HpackTable {
        let mut name_index = IndexMap::with_capacity(STATIC_TABLE.len());
        for (pos, (name, _)) in STATIC_TABLE.iter().enumerate() {
            // `entry().or_insert` mirrors std::map::emplace: the first
            // (lowest-indexed) occurrence of a repeated static name wins.
            name_index.entry((*name).to_string()).or_insert(NameIndex {
                dynamic_seq: None,
                static_pos: Some(pos),
            });
        }

        HpackTable {
            mode,
            dynamic: VecDeque::new(),
            table_size: 0,
            limit_size: DEFAULT_TABLE_SIZE,
            max_size: DEFAULT_TABLE_SIZE,
            index_sequence: 0,
            name_index,
        }
    }

    pub fn set_max_size(&mut self, max_size: u32) {
        self.max_size = max_size;
        if self.limit_size > max_size {
            self.update_limit_size(max_size);
        }
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn limit_size(&self) -> u32 {
        self.limit_size
    }

    pub fn table_size(&self) -> u32 {
        self.table_size
    }

    /// Applies a new SETTINGS_HEADER_TABLE_SIZE / dynamic table size
    /// update, evicting entries if the new limit is smaller. Values above
    /// `max_size` are clamped to `max_size` rather than accepted as-is.
    pub fn update_limit_size(&mut self, limit_size: u32) {
        let limit_size = limit_size.min(self.max_size);
        if self.table_size > limit_size {
            self.evict_by_size(self.table_size - limit_size);
        }
        self.limit_size = limit_size;
    }

    pub fn indexed_name(&self, index: u32) -> Option<&str> {
        self.indexed_entry(index).map(|(name, _)| name)
    }

    pub fn indexed_value(&self, index: u32) -> Option<&str> {
        self.indexed_entry(index).map(|(_, value)| value)
    }

    fn indexed_entry(&self, index: u32) -> Option<(&str, &str)> {
        if index == 0 {
            return None;
        }
        if index < DYNAMIC_START_INDEX {
            let (name, value) = STATIC_TABLE[(index - 1) as usize];
            Some((name, value))
        } else {
            let pos = (index - DYNAMIC_START_INDEX) as usize;
            self.dynamic
                .get(pos)
                .map(|(name, value)| (name.as_str(), value.as_str()))
        }
    }

    /// Inserts a new entry at the front of the dynamic table, evicting
    /// older entries as needed to stay within `limit_size`. Returns
    /// `false` if the entry alone is too large to ever fit.
    pub fn add_header(&mut self, name: &str, value: &str) -> bool {
        let entry_size = name.len() as u32 + value.len() as u32 + ENTRY_SIZE_EXTRA;
        if entry_size + self.table_size > self.limit_size {
            self.evict_by_size(entry_size + self.table_size - self.limit_size);
        }
        if entry_size > self.limit_size {
            return false;
        }

        self.dynamic.push_front((name.to_string(), value.to_string()));
        self.table_size += entry_size;

        if self.mode == Mode::Encoder {
            self.index_sequence += 1;
            self.update_name_index(name, self.index_sequence);
        }
        true
    }

    fn evict_by_size(&mut self, size: u32) {
        let mut evicted = 0u32;
        while evicted < size {
            let Some((name, value)) = self.dynamic.back() else {
                break;
            };
            let entry_size = name.len() as u32 + value.len() as u32 + ENTRY_SIZE_EXTRA;
            self.table_size = self.table_size.saturating_sub(entry_size);
            if self.mode == Mode::Encoder {
                self.remove_name_index(name);
            }
            self.dynamic.pop_back();
            evicted += entry_size;
        }
    }

    fn dynamic_pos(&self, dynamic_seq: Option<u64>) -> Option<u64> {
        dynamic_seq.map(|seq| self.index_sequence - seq)
    }

    fn update_name_index(&mut self, name: &str, seq: u64) {
        match self.name_index.get_mut(name) {
            Some(entry) => entry.dynamic_seq = Some(seq),
            None => {
                self.name_index.insert(
                    name.to_string(),
                    NameIndex {
                        dynamic_seq: Some(seq),
                        static_pos: None,
                    },
                );
            }
        }
    }

    fn remove_name_index(&mut self, name: &str) {
        let dynamic_len = self.dynamic.len() as u64;
        let Some(entry) = self.name_index.get_mut(name) else {
            return;
        };
        let Some(pos) = self.dynamic_pos(entry.dynamic_seq) else {
            return;
        };
        // Only clear the index if it still pointed at the entry we just
        // evicted (the oldest one, at the back of the deque).
        if pos + 1 == dynamic_len {
            if entry.static_pos.is_none() {
                self.name_index.shift_remove(name);
            } else {
                entry.dynamic_seq = None;
            }
        }
    }

    /// Looks up the best available index for `name`, preferring a live
    /// dynamic-table entry over the static table, and reports whether
    /// `value` is also indexed at that position.
    pub fn find_index(&self, name: &str, value: &str) -> Option<(u32, bool)> {
        let entry = self.name_index.get(name)?;
        let dynamic_pos = self.dynamic_pos(entry.dynamic_seq);

        if let Some(pos) = dynamic_pos {
            if (pos as usize) < self.dynamic.len() {
                let (entry_name, entry_value) = &self.dynamic[pos as usize];
                if entry_name == name {
                    let index = pos as u32 + DYNAMIC_START_INDEX;
                    return Some((index, entry_value == value));
                }
            }
        }

        if let Some(pos) = entry.static_pos {
            if pos < STATIC_TABLE.len() {
                let (entry_name, entry_value) = STATIC_TABLE[pos];
                if entry_name == name {
                    let index = pos as u32 + 1;
                    return Some((index, entry_value == value));
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn static_table_index_is_one_based() {
        let table = HpackTable::new(Mode::Decoder);
        assert_eq!(table.indexed_name(1), Some(":authority"));
        assert_eq!(table.indexed_value(2), Some("GET"));
        assert_eq!(table.indexed_name(0), None);
    }

    #[test]
    fn dynamic_insert_is_newest_first() {
        let mut table = HpackTable::new(Mode::Decoder);
        assert!(table.add_header("x-custom-1", "a"));
        assert!(table.add_header("x-custom-2", "b"));

        assert_eq!(table.indexed_name(DYNAMIC_START_INDEX), Some("x-custom-2"));
        assert_eq!(
            table.indexed_name(DYNAMIC_START_INDEX + 1),
            Some("x-custom-1")
        );
    }

    #[test]
    fn eviction_respects_limit_size() {
        let mut table = HpackTable::new(Mode::Decoder);
        table.update_limit_size(64);

        assert!(table.add_header("a", "1111111111111111111111")); // ~47 bytes
        assert!(table.add_header("b", "1111111111111111111111")); // evicts "a"

        assert_eq!(table.indexed_name(DYNAMIC_START_INDEX), Some("b"));
        assert_eq!(table.indexed_name(DYNAMIC_START_INDEX + 1), None);
    }

    #[test]
    fn encoder_finds_dynamic_index_after_insert() {
        let mut table = HpackTable::new(Mode::Encoder);
        table.add_header("x-custom", "v1");

        let (index, value_indexed) = table.find_index("x-custom", "v1").unwrap();
        assert_eq!(index, DYNAMIC_START_INDEX);
        assert!(value_indexed);

        let (index, value_indexed) = table.find_index("x-custom", "v2").unwrap();
        assert_eq!(index, DYNAMIC_START_INDEX);
        assert!(!value_indexed);
    }

    #[test]
    fn limit_size_never_exceeds_max_size() {
        let mut table = HpackTable::new(Mode::Decoder);
        table.update_limit_size(8192);
        assert_eq!(table.limit_size(), DEFAULT_TABLE_SIZE);

        table.set_max_size(2048);
        assert_eq!(table.max_size(), 2048);
        assert_eq!(table.limit_size(), 2048);
    }

    #[test]
    fn encoder_falls_back_to_static_name_after_eviction() {
        let mut table = HpackTable::new(Mode::Encoder);
        table.update_limit_size(64);
        assert!(table.add_header(":method", "PUT"));
        // Evicts the ":method" dynamic entry inserted above.
        assert!(table.add_header("another-header", "v"));

        let (index, value_indexed) = table.find_index(":method", "GET").unwrap();
        assert_eq!(index, 2);
        assert!(value_indexed);
    }
}
