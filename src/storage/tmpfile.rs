//! Fixed-width case storage over an external array.
//!
//! A [`CaseTmpfile`] maps a logical array of cases onto raw byte offsets:
//! value `v` of case `c` lives at `c * case_size + offset_table[v]`. There
//! is no bookkeeping of what has been written; reading a case that was
//! never stored yields unspecified values (zeros in practice), not a crash.
use crate::case::{Case, CaseProto, Value};

use super::ext_array::ExtArray;

pub struct CaseTmpfile {
    proto: CaseProto,
    offsets: Vec<usize>,
    case_size: usize,
    array: ExtArray,
}

impl CaseTmpfile {
    pub fn new(proto: CaseProto) -> CaseTmpfile {
        let offsets = proto.byte_offsets();
        let case_size = proto.case_size();
        CaseTmpfile {
            proto,
            offsets,
            case_size,
            array: ExtArray::new(),
        }
    }

    pub fn proto(&self) -> &CaseProto {
        &self.proto
    }

    pub fn error(&self) -> bool {
        self.array.error()
    }

    pub fn destroy(self) -> bool {
        self.array.destroy()
    }

    /// Writes `values` into slots `[start, start + values.len())` of case
    /// `case_idx`. Stops at the first failure; a failed call may have
    /// landed a partial write, so the caller must treat failure as fatal.
    pub fn put_values(&mut self, case_idx: u64, start: usize, values: &[Value]) -> bool {
        debug_assert!(start + values.len() <= self.proto.len());
        let mut buf = vec![0; self.span_len(start, values.len())];
        let mut at = 0;
        for (i, value) in values.iter().enumerate() {
            let width = self.proto.width(start + i);
            value.encode(width, &mut buf[at..at + width.byte_len()]);
            at += width.byte_len();
        }
        self.array.write(self.value_offset(case_idx, start), &buf)
    }

    /// Reads `n` values starting at slot `start` of case `case_idx`.
    pub fn get_values(&mut self, case_idx: u64, start: usize, n: usize) -> Option<Vec<Value>> {
        debug_assert!(start + n <= self.proto.len());
        let mut buf = vec![0; self.span_len(start, n)];
        if !self.array.read(self.value_offset(case_idx, start), &mut buf) {
            return None;
        }
        let mut values = Vec::with_capacity(n);
        let mut at = 0;
        for i in 0..n {
            let width = self.proto.width(start + i);
            values.push(Value::decode(width, &buf[at..at + width.byte_len()]));
            at += width.byte_len();
        }
        Some(values)
    }

    /// Stores a whole case. Consumes the case regardless of outcome.
    pub fn put_case(&mut self, case_idx: u64, case: Case) -> bool {
        debug_assert!(case.proto().compatible(&self.proto, 0, self.proto.len()));
        self.put_values(case_idx, 0, &case.values()[..self.proto.len()])
    }

    /// Reads back a whole case, or `None` on I/O failure.
    pub fn get_case(&mut self, case_idx: u64) -> Option<Case> {
        let values = self.get_values(case_idx, 0, self.proto.len())?;
        Some(Case::from_values(&self.proto, values))
    }

    fn value_offset(&self, case_idx: u64, value_idx: usize) -> u64 {
        case_idx * self.case_size as u64 + self.offsets[value_idx] as u64
    }

    fn span_len(&self, start: usize, n: usize) -> usize {
        (start..start + n)
            .map(|i| self.proto.width(i).byte_len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::Width;

    fn str_value(s: &[u8]) -> Value {
        Value::Str(s.to_vec().into_boxed_slice())
    }

    #[test]
    fn case_round_trip() {
        let proto = CaseProto::new(vec![Width::Numeric, Width::String(4)]);
        let mut tf = CaseTmpfile::new(proto.clone());

        let a = Case::from_values(&proto, vec![Value::Num(3.5), str_value(b"abcd")]);
        let b = Case::from_values(&proto, vec![Value::Num(7.0), str_value(b"wxyz")]);
        assert!(tf.put_case(0, a));
        assert!(tf.put_case(1, b));

        let back = tf.get_case(1).unwrap();
        assert_eq!(back.num(0), 7.0);
        assert_eq!(back.value(1).as_str(), b"wxyz");
        assert!(!tf.destroy());
    }

    #[test]
    fn partial_value_access() {
        let proto = CaseProto::new(vec![Width::Numeric, Width::String(2), Width::Numeric]);
        let mut tf = CaseTmpfile::new(proto.clone());

        assert!(tf.put_values(5, 1, &[str_value(b"hi"), Value::Num(9.0)]));
        let values = tf.get_values(5, 2, 1).unwrap();
        assert_eq!(values, vec![Value::Num(9.0)]);
    }

    #[test]
    fn empty_widths_take_no_space() {
        let proto = CaseProto::new(vec![Width::Numeric, Width::Empty, Width::Numeric]);
        let mut tf = CaseTmpfile::new(proto.clone());

        let c = Case::from_values(
            &proto,
            vec![Value::Num(1.0), Value::Num(0.0), Value::Num(2.0)],
        );
        assert!(tf.put_case(0, c));
        let back = tf.get_case(0).unwrap();
        assert_eq!(back.num(0), 1.0);
        assert_eq!(back.num(2), 2.0);
    }

    #[test]
    fn interleaved_cases_stay_independent() {
        let proto = CaseProto::new(vec![Width::Numeric]);
        let mut tf = CaseTmpfile::new(proto.clone());

        for i in (0..10).rev() {
            let c = Case::from_values(&proto, vec![Value::Num(i as f64)]);
            assert!(tf.put_case(i, c));
        }
        for i in 0..10 {
            assert_eq!(tf.get_case(i).unwrap().num(0), i as f64);
        }
    }
}
