//! Cases and case prototypes.
//!
//! A *case* is one row of typed values; its shape (which slots are numeric,
//! which are fixed-width strings) is not stored per value but described by a
//! shared, immutable [`CaseProto`]. Cases and prototypes are cheap to clone
//! (`Arc`-backed); mutating a shared case copies it first.
use std::sync::Arc;

/// Width of one value slot: 8-byte numeric, N-byte string, or a placeholder
/// that carries no storage at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Width {
    Numeric,
    String(usize),
    Empty,
}

impl Width {
    /// Bytes this slot contributes to the fixed-width row encoding.
    pub fn byte_len(self) -> usize {
        match self {
            Width::Numeric => size_of::<f64>(),
            Width::String(n) => n,
            Width::Empty => 0,
        }
    }

    pub fn is_empty(self) -> bool {
        matches!(self, Width::Empty)
    }
}

/// A single cell value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Num(f64),
    Str(Box<[u8]>),
}

impl Value {
    /// The all-zero value for a width, matching what unwritten storage
    /// reads back as. `Empty` slots get a numeric placeholder that is never
    /// encoded or read.
    pub fn default_for(width: Width) -> Value {
        match width {
            Width::Numeric | Width::Empty => Value::Num(0.0),
            Width::String(n) => Value::Str(vec![0; n].into_boxed_slice()),
        }
    }

    pub fn matches(&self, width: Width) -> bool {
        match (self, width) {
            (Value::Num(_), Width::Numeric | Width::Empty) => true,
            (Value::Str(s), Width::String(n)) => s.len() == n,
            _ => false,
        }
    }

    pub fn as_num(&self) -> f64 {
        match self {
            Value::Num(x) => *x,
            Value::Str(_) => panic!("numeric access on string value"),
        }
    }

    pub fn as_str(&self) -> &[u8] {
        match self {
            Value::Str(s) => s,
            Value::Num(_) => panic!("string access on numeric value"),
        }
    }

    /// Encodes into exactly `width.byte_len()` bytes.
    pub fn encode(&self, width: Width, out: &mut [u8]) {
        debug_assert_eq!(out.len(), width.byte_len());
        match (self, width) {
            (Value::Num(x), Width::Numeric) => out.copy_from_slice(&x.to_le_bytes()),
            (Value::Str(s), Width::String(_)) => out.copy_from_slice(s),
            (_, Width::Empty) => {}
            _ => panic!("value does not conform to width"),
        }
    }

    /// Decodes from exactly `width.byte_len()` bytes.
    pub fn decode(width: Width, bytes: &[u8]) -> Value {
        debug_assert_eq!(bytes.len(), width.byte_len());
        match width {
            Width::Numeric => {
                let mut buf = [0; size_of::<f64>()];
                buf.copy_from_slice(bytes);
                Value::Num(f64::from_le_bytes(buf))
            }
            Width::String(_) => Value::Str(bytes.to_vec().into_boxed_slice()),
            Width::Empty => Value::Num(0.0),
        }
    }
}

/// An ordered, immutable, shared sequence of widths describing one row.
#[derive(Clone, Debug)]
pub struct CaseProto {
    widths: Arc<[Width]>,
}

impl CaseProto {
    pub fn new(widths: Vec<Width>) -> Self {
        CaseProto {
            widths: widths.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.widths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widths.is_empty()
    }

    pub fn width(&self, idx: usize) -> Width {
        self.widths[idx]
    }

    pub fn widths(&self) -> &[Width] {
        &self.widths
    }

    /// Total bytes of one encoded case.
    pub fn case_size(&self) -> usize {
        self.widths.iter().map(|w| w.byte_len()).sum()
    }

    /// Byte offset of each value within an encoded case.
    pub fn byte_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.widths.len());
        let mut ofs = 0;
        for w in self.widths.iter() {
            offsets.push(ofs);
            ofs += w.byte_len();
        }
        offsets
    }

    /// Whether the two prototypes agree elementwise over `[start, start+n)`.
    pub fn compatible(&self, other: &CaseProto, start: usize, n: usize) -> bool {
        if Arc::ptr_eq(&self.widths, &other.widths) {
            return true;
        }
        if start + n > self.len() || start + n > other.len() {
            return false;
        }
        self.widths[start..start + n] == other.widths[start..start + n]
    }

    /// A new prototype with one extra width at the end.
    pub fn with_appended(&self, width: Width) -> CaseProto {
        let mut widths: Vec<Width> = self.widths.to_vec();
        widths.push(width);
        CaseProto::new(widths)
    }
}

impl PartialEq for CaseProto {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.widths, &other.widths) || self.widths == other.widths
    }
}

impl Eq for CaseProto {}

/// One row of values conforming to a prototype. Cloning is cheap; the first
/// mutation of a shared case unshares it.
#[derive(Clone, Debug)]
pub struct Case {
    proto: CaseProto,
    values: Arc<Vec<Value>>,
}

impl Case {
    /// A case with every slot at its all-zero default.
    pub fn new(proto: &CaseProto) -> Case {
        let values = proto.widths().iter().map(|&w| Value::default_for(w)).collect();
        Case {
            proto: proto.clone(),
            values: Arc::new(values),
        }
    }

    pub fn from_values(proto: &CaseProto, values: Vec<Value>) -> Case {
        debug_assert_eq!(values.len(), proto.len());
        debug_assert!(
            values
                .iter()
                .zip(proto.widths())
                .all(|(v, &w)| v.matches(w))
        );
        Case {
            proto: proto.clone(),
            values: Arc::new(values),
        }
    }

    pub fn proto(&self) -> &CaseProto {
        &self.proto
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, idx: usize) -> &Value {
        &self.values[idx]
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn num(&self, idx: usize) -> f64 {
        self.values[idx].as_num()
    }

    pub fn set_value(&mut self, idx: usize, value: Value) {
        debug_assert!(value.matches(self.proto.width(idx)));
        Arc::make_mut(&mut self.values)[idx] = value;
    }

    /// This case widened by one trailing value, under `proto` (which must be
    /// the original prototype plus one width).
    pub fn with_appended(&self, proto: &CaseProto, value: Value) -> Case {
        debug_assert_eq!(proto.len(), self.proto.len() + 1);
        let mut values: Vec<Value> = self.values.as_ref().clone();
        values.push(value);
        Case::from_values(proto, values)
    }
}

impl PartialEq for Case {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proto_layout() {
        let proto = CaseProto::new(vec![
            Width::Numeric,
            Width::String(4),
            Width::Empty,
            Width::Numeric,
        ]);
        assert_eq!(proto.case_size(), 8 + 4 + 0 + 8);
        assert_eq!(proto.byte_offsets(), vec![0, 8, 12, 12]);
    }

    #[test]
    fn proto_compatibility_is_elementwise() {
        let a = CaseProto::new(vec![Width::Numeric, Width::String(4), Width::Numeric]);
        let b = CaseProto::new(vec![Width::Numeric, Width::String(4), Width::String(2)]);
        assert!(a.compatible(&b, 0, 2));
        assert!(!a.compatible(&b, 0, 3));
        assert!(a.compatible(&a.clone(), 0, 3));
    }

    #[test]
    fn value_codec_round_trip() {
        let mut buf = [0; 8];
        Value::Num(3.5).encode(Width::Numeric, &mut buf);
        assert_eq!(Value::decode(Width::Numeric, &buf), Value::Num(3.5));

        let mut buf = [0; 4];
        Value::Str(b"abcd".to_vec().into_boxed_slice()).encode(Width::String(4), &mut buf);
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn shared_case_unshares_on_write() {
        let proto = CaseProto::new(vec![Width::Numeric]);
        let a = Case::new(&proto);
        let mut b = a.clone();
        b.set_value(0, Value::Num(7.0));
        assert_eq!(a.num(0), 0.0);
        assert_eq!(b.num(0), 7.0);
    }

    #[test]
    fn appended_case_keeps_existing_values() {
        let proto = CaseProto::new(vec![Width::Numeric]);
        let wide = proto.with_appended(Width::Numeric);
        let c = Case::from_values(&proto, vec![Value::Num(1.0)]);
        let c2 = c.with_appended(&wide, Value::Num(2.0));
        assert_eq!(c2.num(0), 1.0);
        assert_eq!(c2.num(1), 2.0);
    }
}
