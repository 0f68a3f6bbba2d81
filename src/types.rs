use std::fmt;
use std::sync::Arc;

use bincode::config::{BigEndian, Configuration, Fixint};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::base::RecordId;

/// Maximum payload bytes of a string field
pub const STRING_LEN: usize = 128;

const INT_LEN: usize = 4;

/// Fixed-width encoding used for every integer written into a page
fn field_codec() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// Column types supported by the page format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum FieldType {
    Int,
    Str,
}

impl FieldType {
    /// Width in bytes of one encoded field of this type
    pub fn len(&self) -> usize {
        match self {
            FieldType::Int => INT_LEN,
            FieldType::Str => INT_LEN + STRING_LEN,
        }
    }

    /// Parse a field of this type from its text form
    pub fn parse(&self, text: &str) -> std::result::Result<Field, String> {
        match self {
            FieldType::Int => text
                .trim()
                .parse::<i32>()
                .map(Field::Int)
                .map_err(|e| format!("invalid int '{}': {}", text.trim(), e)),
            FieldType::Str => Ok(Field::string(text.trim())),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int => write!(f, "int"),
            FieldType::Str => write!(f, "string"),
        }
    }
}

/// Comparison operators understood by [`Field::compare`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEq,
    LessThan,
    LessThanOrEq,
    Like,
}

/// A single typed value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    /// Build a string field, truncated to `STRING_LEN` bytes on a char boundary.
    pub fn string(value: impl Into<String>) -> Self {
        let mut value = value.into();
        if value.len() > STRING_LEN {
            let mut end = STRING_LEN;
            while !value.is_char_boundary(end) {
                end -= 1;
            }
            value.truncate(end);
        }
        Field::Str(value)
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            Field::Int(_) => FieldType::Int,
            Field::Str(_) => FieldType::Str,
        }
    }

    /// Compare `self op other`. Values of different types never match.
    pub fn compare(&self, op: Op, other: &Field) -> bool {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => match op {
                Op::Equals | Op::Like => a == b,
                Op::NotEquals => a != b,
                Op::GreaterThan => a > b,
                Op::GreaterThanOrEq => a >= b,
                Op::LessThan => a < b,
                Op::LessThanOrEq => a <= b,
            },
            (Field::Str(a), Field::Str(b)) => match op {
                Op::Equals => a == b,
                Op::NotEquals => a != b,
                Op::GreaterThan => a > b,
                Op::GreaterThanOrEq => a >= b,
                Op::LessThan => a < b,
                Op::LessThanOrEq => a <= b,
                Op::Like => a.contains(b.as_str()),
            },
            _ => false,
        }
    }

    /// Write this field into `buf`, which must be exactly `field_type().len()` bytes.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<()> {
        let width = self.field_type().len();
        if buf.len() != width {
            return Err(Error::Encode(format!(
                "{} field needs {} bytes, got {}",
                self.field_type(),
                width,
                buf.len()
            )));
        }
        match self {
            Field::Int(v) => {
                bincode::encode_into_slice(*v, buf, field_codec())?;
            }
            Field::Str(s) => {
                let bytes = s.as_bytes();
                if bytes.len() > STRING_LEN {
                    return Err(Error::Encode(format!(
                        "string of {} bytes exceeds {}",
                        bytes.len(),
                        STRING_LEN
                    )));
                }
                bincode::encode_into_slice(bytes.len() as u32, &mut buf[..INT_LEN], field_codec())?;
                let payload = &mut buf[INT_LEN..];
                payload[..bytes.len()].copy_from_slice(bytes);
                payload[bytes.len()..].fill(0);
            }
        }
        Ok(())
    }

    /// Read a field of type `field_type` from the front of `buf`.
    pub fn decode(field_type: FieldType, buf: &[u8]) -> Result<Field> {
        if buf.len() < field_type.len() {
            return Err(Error::decode(
                None,
                format!("{} field needs {} bytes, got {}", field_type, field_type.len(), buf.len()),
            ));
        }
        match field_type {
            FieldType::Int => {
                let (v, _): (i32, usize) = bincode::decode_from_slice(&buf[..INT_LEN], field_codec())?;
                Ok(Field::Int(v))
            }
            FieldType::Str => {
                let (len, _): (u32, usize) = bincode::decode_from_slice(&buf[..INT_LEN], field_codec())?;
                let len = len as usize;
                if len > STRING_LEN {
                    return Err(Error::decode(
                        None,
                        format!("string length {} exceeds {}", len, STRING_LEN),
                    ));
                }
                let payload = &buf[INT_LEN..INT_LEN + len];
                let s = std::str::from_utf8(payload)
                    .map_err(|e| Error::decode(None, format!("invalid utf-8 in string field: {}", e)))?;
                Ok(Field::Str(s.to_string()))
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{}", v),
            Field::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Column metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct Column {
    pub name: Option<String>,
    pub field_type: FieldType,
}

impl Column {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Column {
            name: Some(name.into()),
            field_type,
        }
    }

    pub fn anonymous(field_type: FieldType) -> Self {
        Column {
            name: None,
            field_type,
        }
    }
}

/// Table schema: ordered, fixed-width columns
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Schema { columns }
    }

    /// Schema of unnamed columns with the given types
    pub fn from_types(types: &[FieldType]) -> Self {
        Schema {
            columns: types.iter().copied().map(Column::anonymous).collect(),
        }
    }

    pub fn num_fields(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn field_type(&self, i: usize) -> Option<FieldType> {
        self.columns.get(i).map(|c| c.field_type)
    }

    pub fn field_name(&self, i: usize) -> Option<&str> {
        self.columns.get(i).and_then(|c| c.name.as_deref())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    }

    /// Encoded width of one tuple of this schema
    pub fn tuple_size(&self) -> usize {
        self.columns.iter().map(|c| c.field_type.len()).sum()
    }

    /// Concatenate two schemas, `a`'s columns first
    pub fn merge(a: &Schema, b: &Schema) -> Schema {
        let mut columns = a.columns.clone();
        columns.extend(b.columns.iter().cloned());
        Schema { columns }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match &column.name {
                Some(name) => write!(f, "{}({})", column.field_type, name)?,
                None => write!(f, "{}", column.field_type)?,
            }
        }
        Ok(())
    }
}

/// One row of a table, plus where it lives once persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    schema: Arc<Schema>,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    /// Build a tuple, checking arity and per-column types against `schema`.
    pub fn new(schema: Arc<Schema>, fields: Vec<Field>) -> Result<Self> {
        if fields.len() != schema.num_fields() {
            return Err(Error::SchemaMismatch(format!(
                "tuple has {} fields but schema expects {}",
                fields.len(),
                schema.num_fields()
            )));
        }
        for (i, (field, column)) in fields.iter().zip(&schema.columns).enumerate() {
            if field.field_type() != column.field_type {
                return Err(Error::SchemaMismatch(format!(
                    "field {} is {} but column is {}",
                    i,
                    field.field_type(),
                    column.field_type
                )));
            }
        }
        Ok(Tuple {
            schema,
            fields,
            record_id: None,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, i: usize) -> Option<&Field> {
        self.fields.get(i)
    }

    pub fn set_field(&mut self, i: usize, field: Field) -> Result<()> {
        match self.schema.field_type(i) {
            Some(t) if t == field.field_type() => {
                self.fields[i] = field;
                Ok(())
            }
            Some(t) => Err(Error::SchemaMismatch(format!(
                "field {} is {} but column is {}",
                i,
                field.field_type(),
                t
            ))),
            None => Err(Error::SchemaMismatch(format!("no field {}", i))),
        }
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }

    /// Write the fields at fixed offsets into `buf` (`schema.tuple_size()` bytes).
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<()> {
        let mut offset = 0;
        for field in &self.fields {
            let width = field.field_type().len();
            field.encode_into(&mut buf[offset..offset + width])?;
            offset += width;
        }
        Ok(())
    }

    pub fn decode(schema: Arc<Schema>, buf: &[u8]) -> Result<Self> {
        let mut fields = Vec::with_capacity(schema.num_fields());
        let mut offset = 0;
        for column in &schema.columns {
            let width = column.field_type.len();
            if offset + width > buf.len() {
                return Err(Error::decode(None, "tuple bytes shorter than schema"));
            }
            fields.push(Field::decode(column.field_type, &buf[offset..offset + width])?);
            offset += width;
        }
        Ok(Tuple {
            schema,
            fields,
            record_id: None,
        })
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "\t")?;
            }
            write!(f, "{}", field)?;
        }
        Ok(())
    }
}
