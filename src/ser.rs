use std::fmt::Display;

use serde::ser::{self, Impossible, Serialize};

use crate::error::{Error, ErrorKind};

impl ser::Error for Error {
    fn custom<T: Display>(msg: T) -> Error {
        Error::from(ErrorKind::Serialize(msg.to_string()))
    }
}

/// Serialize `value` into one record's cells.
pub(crate) fn to_record<S: Serialize>(value: &S) -> Result<Vec<Vec<u8>>, Error> {
    value.serialize(RecordSerializer { cells: vec![] })
}

/// The header record for `value`: its field names when it is a struct (or
/// a map with serializable keys), `None` otherwise.
pub(crate) fn header_record<S: Serialize>(
    value: &S,
) -> Result<Option<Vec<Vec<u8>>>, Error> {
    value.serialize(HeaderSerializer { names: vec![] })
}

fn nested() -> Error {
    Error::from(ErrorKind::Serialize(
        "cannot serialize a nested container into a single value".to_string(),
    ))
}

/// Serializes one scalar into the bytes of a single cell.
struct CellSerializer;

impl ser::Serializer for CellSerializer {
    type Ok = Vec<u8>;
    type Error = Error;
    type SerializeSeq = Impossible<Vec<u8>, Error>;
    type SerializeTuple = Impossible<Vec<u8>, Error>;
    type SerializeTupleStruct = Impossible<Vec<u8>, Error>;
    type SerializeTupleVariant = Impossible<Vec<u8>, Error>;
    type SerializeMap = Impossible<Vec<u8>, Error>;
    type SerializeStruct = Impossible<Vec<u8>, Error>;
    type SerializeStructVariant = Impossible<Vec<u8>, Error>;

    fn serialize_bool(self, v: bool) -> Result<Vec<u8>, Error> {
        Ok(if v { b"true".to_vec() } else { b"false".to_vec() })
    }

    fn serialize_i8(self, v: i8) -> Result<Vec<u8>, Error> {
        self.serialize_i64(v as i64)
    }

    fn serialize_i16(self, v: i16) -> Result<Vec<u8>, Error> {
        self.serialize_i64(v as i64)
    }

    fn serialize_i32(self, v: i32) -> Result<Vec<u8>, Error> {
        self.serialize_i64(v as i64)
    }

    fn serialize_i64(self, v: i64) -> Result<Vec<u8>, Error> {
        let mut buf = itoa::Buffer::new();
        Ok(buf.format(v).as_bytes().to_vec())
    }

    fn serialize_u8(self, v: u8) -> Result<Vec<u8>, Error> {
        self.serialize_u64(v as u64)
    }

    fn serialize_u16(self, v: u16) -> Result<Vec<u8>, Error> {
        self.serialize_u64(v as u64)
    }

    fn serialize_u32(self, v: u32) -> Result<Vec<u8>, Error> {
        self.serialize_u64(v as u64)
    }

    fn serialize_u64(self, v: u64) -> Result<Vec<u8>, Error> {
        let mut buf = itoa::Buffer::new();
        Ok(buf.format(v).as_bytes().to_vec())
    }

    fn serialize_f32(self, v: f32) -> Result<Vec<u8>, Error> {
        let mut buf = ryu::Buffer::new();
        Ok(buf.format(v).as_bytes().to_vec())
    }

    fn serialize_f64(self, v: f64) -> Result<Vec<u8>, Error> {
        let mut buf = ryu::Buffer::new();
        Ok(buf.format(v).as_bytes().to_vec())
    }

    fn serialize_char(self, v: char) -> Result<Vec<u8>, Error> {
        let mut buf = [0u8; 4];
        Ok(v.encode_utf8(&mut buf).as_bytes().to_vec())
    }

    fn serialize_str(self, v: &str) -> Result<Vec<u8>, Error> {
        Ok(v.as_bytes().to_vec())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(v.to_vec())
    }

    fn serialize_none(self) -> Result<Vec<u8>, Error> {
        Ok(vec![])
    }

    fn serialize_some<T: ?Sized + Serialize>(
        self,
        value: &T,
    ) -> Result<Vec<u8>, Error> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Vec<u8>, Error> {
        Ok(vec![])
    }

    fn serialize_unit_struct(
        self,
        _name: &'static str,
    ) -> Result<Vec<u8>, Error> {
        Ok(vec![])
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<Vec<u8>, Error> {
        Ok(variant.as_bytes().to_vec())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Vec<u8>, Error> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<Vec<u8>, Error> {
        Err(nested())
    }

    fn serialize_seq(
        self,
        _len: Option<usize>,
    ) -> Result<Self::SerializeSeq, Error> {
        Err(nested())
    }

    fn serialize_tuple(
        self,
        _len: usize,
    ) -> Result<Self::SerializeTuple, Error> {
        Err(nested())
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, Error> {
        Err(nested())
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, Error> {
        Err(nested())
    }

    fn serialize_map(
        self,
        _len: Option<usize>,
    ) -> Result<Self::SerializeMap, Error> {
        Err(nested())
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, Error> {
        Err(nested())
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, Error> {
        Err(nested())
    }
}

/// Serializes one value into a record's worth of cells. Scalars become a
/// single cell; structs, maps, tuples and sequences become one cell per
/// element.
struct RecordSerializer {
    cells: Vec<Vec<u8>>,
}

impl RecordSerializer {
    fn one(value: impl FnOnce() -> Result<Vec<u8>, Error>) -> Result<Vec<Vec<u8>>, Error> {
        Ok(vec![value()?])
    }
}

impl ser::Serializer for RecordSerializer {
    type Ok = Vec<Vec<u8>>;
    type Error = Error;
    type SerializeSeq = RecordCells;
    type SerializeTuple = RecordCells;
    type SerializeTupleStruct = RecordCells;
    type SerializeTupleVariant = Impossible<Vec<Vec<u8>>, Error>;
    type SerializeMap = RecordCells;
    type SerializeStruct = RecordCells;
    type SerializeStructVariant = Impossible<Vec<Vec<u8>>, Error>;

    fn serialize_bool(self, v: bool) -> Result<Vec<Vec<u8>>, Error> {
        RecordSerializer::one(|| CellSerializer.serialize_bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Vec<Vec<u8>>, Error> {
        RecordSerializer::one(|| CellSerializer.serialize_i8(v))
    }

    fn serialize_i16(self, v: i16) -> Result<Vec<Vec<u8>>, Error> {
        RecordSerializer::one(|| CellSerializer.serialize_i16(v))
    }

    fn serialize_i32(self, v: i32) -> Result<Vec<Vec<u8>>, Error> {
        RecordSerializer::one(|| CellSerializer.serialize_i32(v))
    }

    fn serialize_i64(self, v: i64) -> Result<Vec<Vec<u8>>, Error> {
        RecordSerializer::one(|| CellSerializer.serialize_i64(v))
    }

    fn serialize_u8(self, v: u8) -> Result<Vec<Vec<u8>>, Error> {
        RecordSerializer::one(|| CellSerializer.serialize_u8(v))
    }

    fn serialize_u16(self, v: u16) -> Result<Vec<Vec<u8>>, Error> {
        RecordSerializer::one(|| CellSerializer.serialize_u16(v))
    }

    fn serialize_u32(self, v: u32) -> Result<Vec<Vec<u8>>, Error> {
        RecordSerializer::one(|| CellSerializer.serialize_u32(v))
    }

    fn serialize_u64(self, v: u64) -> Result<Vec<Vec<u8>>, Error> {
        RecordSerializer::one(|| CellSerializer.serialize_u64(v))
    }

    fn serialize_f32(self, v: f32) -> Result<Vec<Vec<u8>>, Error> {
        RecordSerializer::one(|| CellSerializer.serialize_f32(v))
    }

    fn serialize_f64(self, v: f64) -> Result<Vec<Vec<u8>>, Error> {
        RecordSerializer::one(|| CellSerializer.serialize_f64(v))
    }

    fn serialize_char(self, v: char) -> Result<Vec<Vec<u8>>, Error> {
        RecordSerializer::one(|| CellSerializer.serialize_char(v))
    }

    fn serialize_str(self, v: &str) -> Result<Vec<Vec<u8>>, Error> {
        RecordSerializer::one(|| CellSerializer.serialize_str(v))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
        RecordSerializer::one(|| CellSerializer.serialize_bytes(v))
    }

    fn serialize_none(self) -> Result<Vec<Vec<u8>>, Error> {
        Ok(vec![vec![]])
    }

    fn serialize_some<T: ?Sized + Serialize>(
        self,
        value: &T,
    ) -> Result<Vec<Vec<u8>>, Error> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Vec<Vec<u8>>, Error> {
        Ok(vec![vec![]])
    }

    fn serialize_unit_struct(
        self,
        _name: &'static str,
    ) -> Result<Vec<Vec<u8>>, Error> {
        Ok(vec![vec![]])
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<Vec<Vec<u8>>, Error> {
        Ok(vec![variant.as_bytes().to_vec()])
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Vec<Vec<u8>>, Error> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<Vec<Vec<u8>>, Error> {
        Err(Error::from(ErrorKind::Serialize(
            "cannot serialize an enum variant with data as a record"
                .to_string(),
        )))
    }

    fn serialize_seq(
        self,
        _len: Option<usize>,
    ) -> Result<RecordCells, Error> {
        Ok(RecordCells { cells: self.cells })
    }

    fn serialize_tuple(self, _len: usize) -> Result<RecordCells, Error> {
        Ok(RecordCells { cells: self.cells })
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<RecordCells, Error> {
        Ok(RecordCells { cells: self.cells })
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, Error> {
        Err(Error::from(ErrorKind::Serialize(
            "cannot serialize an enum variant with data as a record"
                .to_string(),
        )))
    }

    fn serialize_map(
        self,
        _len: Option<usize>,
    ) -> Result<RecordCells, Error> {
        Ok(RecordCells { cells: self.cells })
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<RecordCells, Error> {
        Ok(RecordCells { cells: self.cells })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, Error> {
        Err(Error::from(ErrorKind::Serialize(
            "cannot serialize an enum variant with data as a record"
                .to_string(),
        )))
    }
}

/// Collects the cells of one record.
struct RecordCells {
    cells: Vec<Vec<u8>>,
}

impl ser::SerializeSeq for RecordCells {
    type Ok = Vec<Vec<u8>>;
    type Error = Error;

    fn serialize_element<T: ?Sized + Serialize>(
        &mut self,
        value: &T,
    ) -> Result<(), Error> {
        self.cells.push(value.serialize(CellSerializer)?);
        Ok(())
    }

    fn end(self) -> Result<Vec<Vec<u8>>, Error> {
        Ok(self.cells)
    }
}

impl ser::SerializeTuple for RecordCells {
    type Ok = Vec<Vec<u8>>;
    type Error = Error;

    fn serialize_element<T: ?Sized + Serialize>(
        &mut self,
        value: &T,
    ) -> Result<(), Error> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Vec<Vec<u8>>, Error> {
        Ok(self.cells)
    }
}

impl ser::SerializeTupleStruct for RecordCells {
    type Ok = Vec<Vec<u8>>;
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        value: &T,
    ) -> Result<(), Error> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Vec<Vec<u8>>, Error> {
        Ok(self.cells)
    }
}

impl ser::SerializeMap for RecordCells {
    type Ok = Vec<Vec<u8>>;
    type Error = Error;

    fn serialize_key<T: ?Sized + Serialize>(
        &mut self,
        _key: &T,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(
        &mut self,
        value: &T,
    ) -> Result<(), Error> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Vec<Vec<u8>>, Error> {
        Ok(self.cells)
    }
}

impl ser::SerializeStruct for RecordCells {
    type Ok = Vec<Vec<u8>>;
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), Error> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Vec<Vec<u8>>, Error> {
        Ok(self.cells)
    }
}

/// Extracts a header record from a value's shape. Produces `Some` only
/// for structs and maps, where field names or keys are available.
struct HeaderSerializer {
    names: Vec<Vec<u8>>,
}

type NoHeader = Impossible<Option<Vec<Vec<u8>>>, Error>;

impl ser::Serializer for HeaderSerializer {
    type Ok = Option<Vec<Vec<u8>>>;
    type Error = Error;
    type SerializeSeq = HeaderIgnored;
    type SerializeTuple = HeaderIgnored;
    type SerializeTupleStruct = HeaderIgnored;
    type SerializeTupleVariant = NoHeader;
    type SerializeMap = HeaderNames;
    type SerializeStruct = HeaderNames;
    type SerializeStructVariant = NoHeader;

    fn serialize_bool(self, _v: bool) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_i8(self, _v: i8) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_i16(self, _v: i16) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_i32(self, _v: i32) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_i64(self, _v: i64) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_u8(self, _v: u8) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_u16(self, _v: u16) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_u32(self, _v: u32) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_u64(self, _v: u64) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_f32(self, _v: f32) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_f64(self, _v: f64) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_char(self, _v: char) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_str(self, _v: &str) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_none(self) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_some<T: ?Sized + Serialize>(
        self,
        value: &T,
    ) -> Result<Self::Ok, Error> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_unit_struct(
        self,
        _name: &'static str,
    ) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
    ) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Self::Ok, Error> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<Self::Ok, Error> {
        Ok(None)
    }

    fn serialize_seq(
        self,
        _len: Option<usize>,
    ) -> Result<HeaderIgnored, Error> {
        Ok(HeaderIgnored)
    }

    fn serialize_tuple(self, _len: usize) -> Result<HeaderIgnored, Error> {
        Ok(HeaderIgnored)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<HeaderIgnored, Error> {
        Ok(HeaderIgnored)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, Error> {
        Err(Error::from(ErrorKind::Serialize(
            "cannot serialize an enum variant with data as a record"
                .to_string(),
        )))
    }

    fn serialize_map(
        self,
        _len: Option<usize>,
    ) -> Result<HeaderNames, Error> {
        Ok(HeaderNames { names: self.names })
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<HeaderNames, Error> {
        Ok(HeaderNames { names: self.names })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, Error> {
        Err(Error::from(ErrorKind::Serialize(
            "cannot serialize an enum variant with data as a record"
                .to_string(),
        )))
    }
}

/// Collects the names of a struct's fields or a map's keys.
struct HeaderNames {
    names: Vec<Vec<u8>>,
}

impl ser::SerializeStruct for HeaderNames {
    type Ok = Option<Vec<Vec<u8>>>;
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        _value: &T,
    ) -> Result<(), Error> {
        self.names.push(key.as_bytes().to_vec());
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Error> {
        Ok(Some(self.names))
    }
}

impl ser::SerializeMap for HeaderNames {
    type Ok = Option<Vec<Vec<u8>>>;
    type Error = Error;

    fn serialize_key<T: ?Sized + Serialize>(
        &mut self,
        key: &T,
    ) -> Result<(), Error> {
        self.names.push(key.serialize(CellSerializer)?);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(
        &mut self,
        _value: &T,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Error> {
        Ok(Some(self.names))
    }
}

/// A tuple or sequence has no column names to offer.
struct HeaderIgnored;

macro_rules! header_ignored {
    ($trait:ident, $method:ident) => {
        impl ser::$trait for HeaderIgnored {
            type Ok = Option<Vec<Vec<u8>>>;
            type Error = Error;

            fn $method<T: ?Sized + Serialize>(
                &mut self,
                _value: &T,
            ) -> Result<(), Error> {
                Ok(())
            }

            fn end(self) -> Result<Self::Ok, Error> {
                Ok(None)
            }
        }
    };
}

header_ignored!(SerializeSeq, serialize_element);
header_ignored!(SerializeTuple, serialize_element);
header_ignored!(SerializeTupleStruct, serialize_field);
