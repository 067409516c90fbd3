use std::fmt;
use std::str;

use serde::de::value::StrDeserializer;
use serde::de::{
    self, DeserializeOwned, DeserializeSeed, IntoDeserializer, MapAccess,
    SeqAccess, Visitor,
};

use crate::error::{Error, ErrorKind, Result};
use crate::record::Record;

/// Deserialize one record into `D`.
///
/// With a header record, structs and maps are keyed by header names;
/// without one, everything binds positionally.
pub(crate) fn deserialize_record<D: DeserializeOwned>(
    rec: &Record,
    headers: Option<&Record>,
) -> Result<D> {
    let row = rec.position().map_or(0, |p| p.record());
    D::deserialize(RecordDeserializer { rec, headers }).map_err(
        |err: DeError| {
            Error::from(ErrorKind::Deserialize {
                row,
                field: err.field.unwrap_or(0),
                message: err.msg,
            })
        },
    )
}

/// The internal deserialization error, carrying the offending field when
/// known.
#[derive(Debug)]
struct DeError {
    field: Option<usize>,
    msg: String,
}

impl DeError {
    fn at(field: usize, msg: String) -> DeError {
        DeError { field: Some(field), msg }
    }
}

impl fmt::Display for DeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.msg)
    }
}

impl std::error::Error for DeError {}

impl de::Error for DeError {
    fn custom<T: fmt::Display>(msg: T) -> DeError {
        DeError { field: None, msg: msg.to_string() }
    }
}

/// Deserializes a whole record.
struct RecordDeserializer<'r> {
    rec: &'r Record,
    headers: Option<&'r Record>,
}

impl<'r> RecordDeserializer<'r> {
    fn value(&self, i: usize) -> std::result::Result<ValueDeserializer<'r>, DeError> {
        let bytes = self.rec.get(i).unwrap_or(b"");
        let text = str::from_utf8(bytes).map_err(|_| {
            DeError::at(i, "invalid UTF-8 in value".to_string())
        })?;
        Ok(ValueDeserializer { text, field: i })
    }

    /// Delegate to the only value. Lets `D` be a plain scalar when every
    /// record has exactly one value.
    fn single(self) -> std::result::Result<ValueDeserializer<'r>, DeError> {
        if self.rec.len() != 1 {
            return Err(de::Error::custom(format!(
                "expected a single value, found a record of {}",
                self.rec.len()
            )));
        }
        self.value(0)
    }
}

macro_rules! forward_to_single {
    ($($method:ident)*) => {
        $(
            fn $method<V: Visitor<'de>>(
                self,
                visitor: V,
            ) -> std::result::Result<V::Value, DeError> {
                self.single()?.$method(visitor)
            }
        )*
    };
}

impl<'de, 'r> de::Deserializer<'de> for RecordDeserializer<'r> {
    type Error = DeError;

    forward_to_single! {
        deserialize_bool
        deserialize_i8 deserialize_i16 deserialize_i32 deserialize_i64
        deserialize_u8 deserialize_u16 deserialize_u32 deserialize_u64
        deserialize_f32 deserialize_f64
        deserialize_char deserialize_str deserialize_string
        deserialize_bytes deserialize_byte_buf
        deserialize_option deserialize_unit deserialize_identifier
    }

    fn deserialize_any<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_seq(RecordSeq { de: self, i: 0 })
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        match self.headers {
            Some(headers) => {
                visitor.visit_map(RecordMap { de: self, headers, i: 0 })
            }
            None => Err(de::Error::custom(
                "cannot deserialize by field name without a header record",
            )),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        match self.headers {
            Some(_) => self.deserialize_map(visitor),
            None => self.deserialize_seq(visitor),
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        self.single()?.deserialize_enum(name, variants, visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_unit()
    }
}

struct RecordSeq<'r> {
    de: RecordDeserializer<'r>,
    i: usize,
}

impl<'de, 'r> SeqAccess<'de> for RecordSeq<'r> {
    type Error = DeError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> std::result::Result<Option<T::Value>, DeError> {
        if self.i >= self.de.rec.len() {
            return Ok(None);
        }
        let value = self.de.value(self.i)?;
        self.i += 1;
        seed.deserialize(value).map(Some)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.de.rec.len() - self.i)
    }
}

struct RecordMap<'r> {
    de: RecordDeserializer<'r>,
    headers: &'r Record,
    i: usize,
}

impl<'de, 'r> MapAccess<'de> for RecordMap<'r> {
    type Error = DeError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> std::result::Result<Option<K::Value>, DeError> {
        if self.i >= self.headers.len() || self.i >= self.de.rec.len() {
            return Ok(None);
        }
        let name = self.headers.get(self.i).unwrap_or(b"");
        let name = str::from_utf8(name).map_err(|_| {
            DeError::at(self.i, "invalid UTF-8 in header".to_string())
        })?;
        let key: StrDeserializer<DeError> = name.into_deserializer();
        seed.deserialize(key).map(Some)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(
        &mut self,
        seed: V,
    ) -> std::result::Result<V::Value, DeError> {
        let value = self.de.value(self.i)?;
        self.i += 1;
        seed.deserialize(value)
    }
}

/// Deserializes one value's text.
#[derive(Clone, Copy)]
struct ValueDeserializer<'r> {
    text: &'r str,
    field: usize,
}

impl<'r> ValueDeserializer<'r> {
    fn parse<T: str::FromStr>(
        &self,
        what: &str,
    ) -> std::result::Result<T, DeError> {
        self.text.parse().map_err(|_| {
            DeError::at(
                self.field,
                format!("invalid {}: {:?}", what, self.text),
            )
        })
    }
}

macro_rules! deserialize_parsed {
    ($($method:ident => ($ty:ty, $visit:ident, $what:expr),)*) => {
        $(
            fn $method<V: Visitor<'de>>(
                self,
                visitor: V,
            ) -> std::result::Result<V::Value, DeError> {
                visitor.$visit(self.parse::<$ty>($what)?)
            }
        )*
    };
}

impl<'de, 'r> de::Deserializer<'de> for ValueDeserializer<'r> {
    type Error = DeError;

    deserialize_parsed! {
        deserialize_bool => (bool, visit_bool, "boolean"),
        deserialize_i8 => (i8, visit_i8, "integer"),
        deserialize_i16 => (i16, visit_i16, "integer"),
        deserialize_i32 => (i32, visit_i32, "integer"),
        deserialize_i64 => (i64, visit_i64, "integer"),
        deserialize_u8 => (u8, visit_u8, "integer"),
        deserialize_u16 => (u16, visit_u16, "integer"),
        deserialize_u32 => (u32, visit_u32, "integer"),
        deserialize_u64 => (u64, visit_u64, "integer"),
        deserialize_f32 => (f32, visit_f32, "number"),
        deserialize_f64 => (f64, visit_f64, "number"),
        deserialize_char => (char, visit_char, "character"),
    }

    fn deserialize_any<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_str(self.text)
    }

    fn deserialize_str<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_str(self.text)
    }

    fn deserialize_string<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_string(self.text.to_string())
    }

    fn deserialize_bytes<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_bytes(self.text.as_bytes())
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_byte_buf(self.text.as_bytes().to_vec())
    }

    fn deserialize_option<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        if self.text.is_empty() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        if self.text.is_empty() {
            visitor.visit_unit()
        } else {
            Err(DeError::at(
                self.field,
                format!("expected an empty value, found {:?}", self.text),
            ))
        }
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(
        self,
        _visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        Err(DeError::at(
            self.field,
            "cannot deserialize a container from a single value".to_string(),
        ))
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_enum(self.text.into_deserializer())
    }

    fn deserialize_identifier<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        self.deserialize_str(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> std::result::Result<V::Value, DeError> {
        visitor.visit_unit()
    }
}

/// Deserialize a standalone record, for callers that already hold
/// records rather than a reader.
pub fn from_record<D: DeserializeOwned>(
    rec: &Record,
    headers: Option<&Record>,
) -> Result<D> {
    deserialize_record(rec, headers)
}

#[cfg(test)]
mod tests {
    use super::deserialize_record;
    use crate::error::ErrorKind;
    use crate::record::Record;

    use serde::Deserialize;

    fn rec(values: &[&str]) -> Record {
        values.iter().collect()
    }

    #[derive(Debug, Deserialize, Eq, PartialEq)]
    struct Row {
        city: String,
        pop: u64,
    }

    #[test]
    fn struct_by_headers() {
        let headers = rec(&["pop", "city"]);
        let data = rec(&["42695", "Concord"]);
        let row: Row = deserialize_record(&data, Some(&headers)).unwrap();
        assert_eq!(Row { city: "Concord".to_string(), pop: 42695 }, row);
    }

    #[test]
    fn struct_by_position() {
        let data = rec(&["Concord", "42695"]);
        let row: Row = deserialize_record(&data, None).unwrap();
        assert_eq!(Row { city: "Concord".to_string(), pop: 42695 }, row);
    }

    #[test]
    fn tuples_bind_by_position() {
        let data = rec(&["1", "x", "2.5"]);
        let row: (i32, String, f64) =
            deserialize_record(&data, None).unwrap();
        assert_eq!((1, "x".to_string(), 2.5), row);
    }

    #[test]
    fn options_from_empty_values() {
        let data = rec(&["", "7"]);
        let row: (Option<i32>, Option<i32>) =
            deserialize_record(&data, None).unwrap();
        assert_eq!((None, Some(7)), row);
    }

    #[test]
    fn parse_failure_reports_field() {
        let data = rec(&["1", "x"]);
        let err = deserialize_record::<(i32, i32)>(&data, None).unwrap_err();
        match err.into_kind() {
            ErrorKind::Deserialize { field, message, .. } => {
                assert_eq!(1, field);
                assert!(message.contains("invalid integer"));
            }
            kind => panic!("unexpected error: {:?}", kind),
        }
    }

    #[test]
    fn unit_enum_variants() {
        #[derive(Debug, Deserialize, Eq, PartialEq)]
        enum Color {
            Red,
            Blue,
        }
        let data = rec(&["Blue"]);
        let color: Color = deserialize_record(&data, None).unwrap();
        assert_eq!(Color::Blue, color);
        let data = rec(&["Green"]);
        assert!(deserialize_record::<Color>(&data, None).is_err());
    }

    #[test]
    fn single_scalar_records() {
        let data = rec(&["12"]);
        let n: i64 = deserialize_record(&data, None).unwrap();
        assert_eq!(12, n);
    }

    #[test]
    fn vec_of_strings() {
        let data = rec(&["a", "b", "c"]);
        let v: Vec<String> = deserialize_record(&data, None).unwrap();
        assert_eq!(vec!["a", "b", "c"], v);
    }
}
