use bytes::{Buf, BufMut};

use crate::common::{CinderError, PageId, Result, PAGE_SIZE};

const MAGIC_NUMBER: u32 = 0x43_4E_44_52; // "CNDR"
const VERSION: u32 = 1;

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const RECORD_COUNT_OFFSET: usize = 8;
const RECORDS_OFFSET: usize = 12;

/// Index names are stored zero-padded in a fixed-width field.
pub const MAX_INDEX_NAME_LEN: usize = 32;

const RECORD_SIZE: usize = MAX_INDEX_NAME_LEN + 4; // name + root_page_id
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// View over page 0, which maps index names to their current root page.
///
/// The buffer type decides what the view can do: `&[u8]` gives a read-only
/// view, `&mut [u8]` additionally allows updates.
pub struct HeaderPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> HeaderPage<B> {
    pub fn new(data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }

    fn read_u32(&self, offset: usize) -> u32 {
        (&self.data.as_ref()[offset..offset + 4]).get_u32_le()
    }

    pub fn is_valid(&self) -> bool {
        self.read_u32(MAGIC_OFFSET) == MAGIC_NUMBER
    }

    pub fn version(&self) -> u32 {
        self.read_u32(VERSION_OFFSET)
    }

    pub fn record_count(&self) -> usize {
        self.read_u32(RECORD_COUNT_OFFSET) as usize
    }

    fn record_offset(index: usize) -> usize {
        RECORDS_OFFSET + index * RECORD_SIZE
    }

    fn name_at(&self, index: usize) -> &[u8] {
        let offset = Self::record_offset(index);
        let field = &self.data.as_ref()[offset..offset + MAX_INDEX_NAME_LEN];
        let len = field.iter().position(|&b| b == 0).unwrap_or(MAX_INDEX_NAME_LEN);
        &field[..len]
    }

    fn root_at(&self, index: usize) -> PageId {
        PageId::new(self.read_u32(Self::record_offset(index) + MAX_INDEX_NAME_LEN))
    }

    fn find_record(&self, name: &str) -> Option<usize> {
        (0..self.record_count()).find(|&i| self.name_at(i) == name.as_bytes())
    }

    /// Returns the root page recorded for `name`, if the index is known.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.find_record(name).map(|i| self.root_at(i))
    }

    /// All (index name, root page) records in insertion order.
    pub fn records(&self) -> Vec<(String, PageId)> {
        (0..self.record_count())
            .map(|i| {
                (
                    String::from_utf8_lossy(self.name_at(i)).into_owned(),
                    self.root_at(i),
                )
            })
            .collect()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HeaderPage<B> {
    pub fn init(&mut self) {
        self.data.as_mut().fill(0);
        self.write_u32(MAGIC_OFFSET, MAGIC_NUMBER);
        self.write_u32(VERSION_OFFSET, VERSION);
        self.write_u32(RECORD_COUNT_OFFSET, 0);
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        (&mut self.data.as_mut()[offset..offset + 4]).put_u32_le(value);
    }

    fn set_record(&mut self, index: usize, name: &str, root: PageId) {
        let offset = Self::record_offset(index);
        let field = &mut self.data.as_mut()[offset..offset + MAX_INDEX_NAME_LEN];
        field.fill(0);
        field[..name.len()].copy_from_slice(name.as_bytes());
        self.write_u32(offset + MAX_INDEX_NAME_LEN, root.as_u32());
    }

    /// Adds a record for a new index. Returns false if `name` is already present.
    pub fn insert_record(&mut self, name: &str, root: PageId) -> Result<bool> {
        if name.is_empty() || name.len() > MAX_INDEX_NAME_LEN || name.as_bytes().contains(&0) {
            return Err(CinderError::InvalidConfig(format!(
                "index name {:?} must be 1..={} bytes without NUL",
                name, MAX_INDEX_NAME_LEN
            )));
        }
        if self.find_record(name).is_some() {
            return Ok(false);
        }

        let count = self.record_count();
        if count >= MAX_RECORDS {
            return Err(CinderError::HeaderFull);
        }

        self.set_record(count, name, root);
        self.write_u32(RECORD_COUNT_OFFSET, (count + 1) as u32);
        Ok(true)
    }

    /// Rewrites the root page of an existing record. Returns false if absent.
    pub fn update_record(&mut self, name: &str, root: PageId) -> bool {
        match self.find_record(name) {
            Some(index) => {
                self.write_u32(Self::record_offset(index) + MAX_INDEX_NAME_LEN, root.as_u32());
                true
            }
            None => false,
        }
    }

    /// Drops a record, moving the last record into its slot.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let Some(index) = self.find_record(name) else {
            return false;
        };

        let count = self.record_count();
        let last = count - 1;
        if index != last {
            let last_name = String::from_utf8_lossy(self.name_at(last)).into_owned();
            let last_root = self.root_at(last);
            self.set_record(index, &last_name, last_root);
        }
        let last_offset = Self::record_offset(last);
        self.data.as_mut()[last_offset..last_offset + RECORD_SIZE].fill(0);
        self.write_u32(RECORD_COUNT_OFFSET, last as u32);
        true
    }
}
