//! Bulk conversion of comma-separated text into heap-file pages.

use std::io::{BufRead, Write};
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::base::{PageId, PageNumber};
use crate::storage::page::{HeapPage, PageLayout};
use crate::types::{Schema, Tuple};

/// Read one tuple per line from `reader` and write full pages to `writer`,
/// filling each page before starting the next. A trailing partial page is
/// padded to `page_size`; nothing is written for empty input.
///
/// Returns the number of tuples written.
pub fn encode_text<R: BufRead, W: Write>(
    reader: R,
    schema: &Schema,
    page_size: usize,
    mut writer: W,
) -> Result<usize> {
    let schema = Arc::new(schema.clone());
    let layout = PageLayout::new(&schema, page_size)?;

    let mut page_number: PageNumber = 0;
    let mut page = HeapPage::empty(PageId::new(0, page_number), schema.clone(), layout);
    let mut count = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut tuple = parse_line(&schema, &line).map_err(|message| Error::Parse {
            line: index + 1,
            message,
        })?;

        if page.free_slots() == 0 {
            writer.write_all(&page.encode()?)?;
            page_number += 1;
            page = HeapPage::empty(PageId::new(0, page_number), schema.clone(), layout);
        }
        page.insert_tuple(&mut tuple)?;
        count += 1;
    }

    let pages = if page.occupied_slots() > 0 {
        writer.write_all(&page.encode()?)?;
        page_number as usize + 1
    } else {
        0
    };
    writer.flush()?;

    debug!(tuples = count, pages, page_size, "encoded heap file");
    Ok(count)
}

fn parse_line(schema: &Arc<Schema>, line: &str) -> std::result::Result<Tuple, String> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() != schema.num_fields() {
        return Err(format!(
            "expected {} fields, found {}",
            schema.num_fields(),
            parts.len()
        ));
    }

    let fields = parts
        .iter()
        .enumerate()
        .map(|(i, text)| match schema.field_type(i) {
            Some(field_type) => field_type.parse(text),
            None => Err(format!("no column {}", i)),
        })
        .collect::<std::result::Result<Vec<_>, String>>()?;

    Tuple::new(schema.clone(), fields).map_err(|e| e.to_string())
}
