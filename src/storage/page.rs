use std::sync::Arc;

use crate::error::{Error, Result};
use crate::storage::base::{PageId, PageNumber, RecordId, SlotId};
use crate::transaction::TransactionId;
use crate::types::{Schema, Tuple};

/// Upper bound on slots per page so every slot fits a `SlotId`
const MAX_SLOTS: usize = SlotId::MAX as usize + 1;

/// Byte layout of a slotted page for one schema and page size.
///
/// ```text
/// +----------------------+-----------+-----------+-----+---------+
/// | occupancy bitmap     | tuple 0   | tuple 1   | ... | padding |
/// | ceil(slots / 8) B    | tuple_size| tuple_size|     |         |
/// +----------------------+-----------+-----------+-----+---------+
/// ```
///
/// Each slot costs `tuple_size` bytes plus one bitmap bit, so
/// `slots = floor(page_size * 8 / (tuple_size * 8 + 1))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    pub page_size: usize,
    pub tuple_size: usize,
    pub slots: usize,
    pub header_len: usize,
}

impl PageLayout {
    pub fn new(schema: &Schema, page_size: usize) -> Result<Self> {
        let tuple_size = schema.tuple_size();
        if tuple_size == 0 {
            return Err(Error::InvalidConfig("schema has no columns".to_string()));
        }
        let slots = (page_size * 8 / (tuple_size * 8 + 1)).min(MAX_SLOTS);
        if slots == 0 {
            return Err(Error::InvalidConfig(format!(
                "tuple of {} bytes does not fit a {} byte page",
                tuple_size, page_size
            )));
        }
        Ok(PageLayout {
            page_size,
            tuple_size,
            slots,
            header_len: slots.div_ceil(8),
        })
    }

    fn tuple_offset(&self, slot: usize) -> usize {
        self.header_len + slot * self.tuple_size
    }
}

/// In-memory slotted page: occupancy bitmap plus one decoded tuple per used slot.
///
/// `dirtied_by` is cache-side metadata and never part of the encoded bytes.
#[derive(Debug, Clone)]
pub struct HeapPage {
    pid: PageId,
    schema: Arc<Schema>,
    layout: PageLayout,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    dirtied_by: Option<TransactionId>,
}

impl HeapPage {
    /// Blank page: every slot free
    pub fn empty(pid: PageId, schema: Arc<Schema>, layout: PageLayout) -> Self {
        HeapPage {
            pid,
            schema,
            layout,
            header: vec![0u8; layout.header_len],
            tuples: vec![None; layout.slots],
            dirtied_by: None,
        }
    }

    /// Bytes of a blank page. An all-zero bitmap marks every slot free.
    pub fn empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0u8; page_size]
    }

    /// Decode one page-size window. Tuples are only decoded for set bits;
    /// unused slots may hold arbitrary bytes.
    pub fn decode(pid: PageId, schema: Arc<Schema>, layout: PageLayout, data: &[u8]) -> Result<Self> {
        if data.len() != layout.page_size {
            return Err(Error::decode(
                Some(pid),
                format!("expected {} bytes, got {}", layout.page_size, data.len()),
            ));
        }

        let header = data[..layout.header_len].to_vec();
        for bit in layout.slots..layout.header_len * 8 {
            if header[bit / 8] & (1 << (bit % 8)) != 0 {
                return Err(Error::decode(
                    Some(pid),
                    format!("bitmap marks slot {} beyond capacity {}", bit, layout.slots),
                ));
            }
        }

        let mut page = HeapPage {
            pid,
            schema,
            layout,
            header,
            tuples: vec![None; layout.slots],
            dirtied_by: None,
        };

        for slot in 0..layout.slots {
            if !page.is_slot_used(slot) {
                continue;
            }
            let start = layout.tuple_offset(slot);
            let bytes = &data[start..start + layout.tuple_size];
            let mut tuple = Tuple::decode(page.schema.clone(), bytes).map_err(|e| match e {
                Error::Decode { page: None, reason } => Error::Decode {
                    page: Some(pid),
                    reason: format!("slot {}: {}", slot, reason),
                },
                other => other,
            })?;
            tuple.set_record_id(Some(RecordId::new(pid, slot as SlotId)));
            page.tuples[slot] = Some(tuple);
        }

        Ok(page)
    }

    /// Exactly `page_size` bytes; unused slots and trailing padding are zero.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut data = vec![0u8; self.layout.page_size];
        data[..self.layout.header_len].copy_from_slice(&self.header);
        for (slot, tuple) in self.tuples.iter().enumerate() {
            if let Some(tuple) = tuple {
                let start = self.layout.tuple_offset(slot);
                tuple.encode_into(&mut data[start..start + self.layout.tuple_size])?;
            }
        }
        Ok(data)
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn layout(&self) -> PageLayout {
        self.layout
    }

    pub fn num_slots(&self) -> usize {
        self.layout.slots
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.layout.slots && self.header[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn set_slot(&mut self, slot: usize, used: bool) {
        let mask = 1u8 << (slot % 8);
        if used {
            self.header[slot / 8] |= mask;
        } else {
            self.header[slot / 8] &= !mask;
        }
    }

    pub fn occupied_slots(&self) -> usize {
        self.header.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn free_slots(&self) -> usize {
        self.layout.slots - self.occupied_slots()
    }

    /// Lowest-numbered free slot
    pub fn first_free_slot(&self) -> Option<SlotId> {
        (0..self.layout.slots)
            .find(|&slot| !self.is_slot_used(slot))
            .map(|slot| slot as SlotId)
    }

    /// Place `tuple` in the lowest free slot and stamp its record id.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> Result<RecordId> {
        if tuple.schema().as_ref() != self.schema.as_ref() {
            return Err(Error::SchemaMismatch(format!(
                "tuple schema ({}) differs from page schema ({})",
                tuple.schema(),
                self.schema
            )));
        }
        let slot = self.first_free_slot().ok_or(Error::PageFull(self.pid))?;
        let rid = RecordId::new(self.pid, slot);

        self.set_slot(slot as usize, true);
        tuple.set_record_id(Some(rid));
        self.tuples[slot as usize] = Some(tuple.clone());
        Ok(rid)
    }

    /// Free `slot`, returning the tuple that occupied it.
    pub fn delete_slot(&mut self, slot: SlotId) -> Result<Tuple> {
        let index = slot as usize;
        if !self.is_slot_used(index) {
            return Err(Error::SlotEmpty {
                page: self.pid,
                slot,
            });
        }
        self.set_slot(index, false);
        self.tuples[index]
            .take()
            .ok_or(Error::SlotEmpty { page: self.pid, slot })
    }

    pub fn tuple(&self, slot: SlotId) -> Option<&Tuple> {
        self.tuples.get(slot as usize).and_then(|t| t.as_ref())
    }

    /// First used slot at or after `from`
    pub fn next_occupied(&self, from: usize) -> Option<SlotId> {
        (from..self.layout.slots)
            .find(|&slot| self.is_slot_used(slot))
            .map(|slot| slot as SlotId)
    }

    /// Live tuples in ascending slot order. Each call starts again at slot 0.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().flatten()
    }

    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirtied_by = tid;
    }

    pub fn dirtied_by(&self) -> Option<TransactionId> {
        self.dirtied_by
    }

    pub fn is_dirty(&self) -> bool {
        self.dirtied_by.is_some()
    }

    /// Id of the following page, if `page_count` says one exists
    pub fn next_page(&self, page_count: usize) -> Option<PageId> {
        let next = self.pid.page_number as usize + 1;
        (next < page_count).then(|| PageId::new(self.pid.table_id, next as PageNumber))
    }
}

impl PartialEq for HeapPage {
    fn eq(&self, other: &Self) -> bool {
        self.pid == other.pid
            && self.layout == other.layout
            && self.header == other.header
            && self.tuples == other.tuples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, Field, FieldType};

    fn int_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Column::new("a", FieldType::Int),
            Column::new("b", FieldType::Int),
        ]))
    }

    fn tuple(schema: &Arc<Schema>, a: i32, b: i32) -> Tuple {
        Tuple::new(schema.clone(), vec![Field::Int(a), Field::Int(b)]).unwrap()
    }

    fn blank(schema: &Arc<Schema>, page_size: usize) -> HeapPage {
        let layout = PageLayout::new(schema, page_size).unwrap();
        HeapPage::empty(PageId::new(9, 0), schema.clone(), layout)
    }

    #[test]
    fn test_layout_capacity() {
        let schema = int_schema();
        let layout = PageLayout::new(&schema, 4096).unwrap();
        // 4096 * 8 / (8 * 8 + 1)
        assert_eq!(layout.slots, 504);
        assert_eq!(layout.header_len, 63);
        assert!(layout.header_len + layout.slots * layout.tuple_size <= 4096);
    }

    #[test]
    fn test_layout_rejects_oversized_tuple() {
        let schema = int_schema();
        assert!(matches!(PageLayout::new(&schema, 8), Err(Error::InvalidConfig(_))));
        assert!(matches!(
            PageLayout::new(&Schema::new(vec![]), 4096),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_insert_uses_lowest_free_slot() {
        let schema = int_schema();
        let mut page = blank(&schema, 4096);

        let mut t0 = tuple(&schema, 0, 0);
        let mut t1 = tuple(&schema, 1, 1);
        assert_eq!(page.insert_tuple(&mut t0).unwrap().slot, 0);
        assert_eq!(page.insert_tuple(&mut t1).unwrap().slot, 1);
        assert_eq!(t1.record_id(), Some(RecordId::new(page.id(), 1)));

        page.delete_slot(0).unwrap();
        let mut t2 = tuple(&schema, 2, 2);
        assert_eq!(page.insert_tuple(&mut t2).unwrap().slot, 0);
        assert_eq!(page.occupied_slots(), 2);
        assert_eq!(page.free_slots(), page.num_slots() - 2);
    }

    #[test]
    fn test_insert_into_full_page_fails() {
        let schema = int_schema();
        // 24 * 8 / 65 = 2 slots
        let mut page = blank(&schema, 24);
        assert_eq!(page.num_slots(), 2);
        page.insert_tuple(&mut tuple(&schema, 1, 1)).unwrap();
        page.insert_tuple(&mut tuple(&schema, 2, 2)).unwrap();
        assert!(matches!(page.insert_tuple(&mut tuple(&schema, 3, 3)), Err(Error::PageFull(_))));
    }

    #[test]
    fn test_delete_empty_slot_fails() {
        let schema = int_schema();
        let mut page = blank(&schema, 4096);
        assert!(matches!(page.delete_slot(3), Err(Error::SlotEmpty { slot: 3, .. })));
        page.insert_tuple(&mut tuple(&schema, 1, 1)).unwrap();
        page.delete_slot(0).unwrap();
        assert!(matches!(page.delete_slot(0), Err(Error::SlotEmpty { .. })));
    }

    #[test]
    fn test_insert_rejects_other_schema() {
        let schema = int_schema();
        let mut page = blank(&schema, 4096);
        let other = Arc::new(Schema::from_types(&[FieldType::Int, FieldType::Int]));
        let mut t = Tuple::new(other, vec![Field::Int(1), Field::Int(2)]).unwrap();
        assert!(matches!(page.insert_tuple(&mut t), Err(Error::SchemaMismatch(_))));
        assert_eq!(t.record_id(), None);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let schema = int_schema();
        let mut page = blank(&schema, 4096);
        for i in 0..20 {
            page.insert_tuple(&mut tuple(&schema, i, -i)).unwrap();
        }
        page.delete_slot(4).unwrap();
        page.delete_slot(11).unwrap();
        page.mark_dirty(Some(TransactionId::new()));

        let bytes = page.encode().unwrap();
        assert_eq!(bytes.len(), 4096);

        let decoded = HeapPage::decode(page.id(), schema, page.layout(), &bytes).unwrap();
        assert_eq!(decoded, page);
        assert!(!decoded.is_dirty());
        assert_eq!(decoded.occupied_slots(), 18);
        assert_eq!(
            decoded.tuple(5).and_then(|t| t.record_id()),
            Some(RecordId::new(page.id(), 5))
        );
    }

    #[test]
    fn test_bitmap_is_lsb_first() {
        let schema = int_schema();
        let mut page = blank(&schema, 4096);
        for i in 0..10 {
            page.insert_tuple(&mut tuple(&schema, i, i)).unwrap();
        }
        page.delete_slot(1).unwrap();
        let bytes = page.encode().unwrap();
        assert_eq!(bytes[0], 0b1111_1101);
        assert_eq!(bytes[1], 0b0000_0011);
    }

    #[test]
    fn test_decode_rejects_short_window() {
        let schema = int_schema();
        let layout = PageLayout::new(&schema, 4096).unwrap();
        let err = HeapPage::decode(PageId::new(1, 0), schema, layout, &[0u8; 100]).unwrap_err();
        assert!(matches!(err, Error::Decode { page: Some(_), .. }));
    }

    #[test]
    fn test_decode_rejects_bits_past_capacity() {
        let schema = int_schema();
        let layout = PageLayout::new(&schema, 4096).unwrap();
        let mut data = HeapPage::empty_page_data(4096);
        // 504 slots fill 63 bytes exactly, so use a layout with slack bits
        let small = PageLayout::new(&schema, 100).unwrap();
        assert_eq!(small.slots, 12);
        let mut small_data = HeapPage::empty_page_data(100);
        small_data[1] = 0b1000_0000;
        assert!(HeapPage::decode(PageId::new(1, 0), schema.clone(), small, &small_data).is_err());

        data[0] = 0b0000_0001;
        assert!(HeapPage::decode(PageId::new(1, 0), schema, layout, &data).is_ok());
    }

    #[test]
    fn test_iteration_in_slot_order_and_restartable() {
        let schema = int_schema();
        let mut page = blank(&schema, 4096);
        for i in 0..5 {
            page.insert_tuple(&mut tuple(&schema, i, 0)).unwrap();
        }
        page.delete_slot(2).unwrap();

        let first: Vec<i32> = page
            .iter()
            .map(|t| match t.field(0) {
                Some(Field::Int(v)) => *v,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(first, vec![0, 1, 3, 4]);
        assert_eq!(page.iter().count(), 4);
        assert_eq!(page.next_occupied(2), Some(3));
        assert_eq!(page.next_occupied(5), None);
    }

    #[test]
    fn test_next_page_bounded_by_count() {
        let schema = int_schema();
        let page = blank(&schema, 4096);
        assert_eq!(page.next_page(1), None);
        assert_eq!(page.next_page(3), Some(PageId::new(9, 1)));
    }
}
