//! Array codec.
//!
//! Binary format: ndim, has-nulls flag, element OID, per-dimension
//! (length, lower bound), then elements as length-prefixed bytes with -1
//! for NULL. Element decoding recurses through the registry. Text format is
//! the brace syntax; both produce the same value.

use super::{oid, Format, SessionParams, TypeError, TypeRegistry, Value};

/// Decode an array in either format (registry entry point).
pub fn decode(
    reg: &TypeRegistry,
    session: &SessionParams,
    array_oid: u32,
    bytes: &[u8],
    format: Format,
) -> Result<Value, TypeError> {
    match format {
        Format::Binary => decode_binary_payload(reg, session, bytes),
        Format::Text => {
            let element_oid = oid::element_of(array_oid).ok_or_else(|| {
                TypeError::InvalidData(format!("OID {} is not a known array type", array_oid))
            })?;
            let text = std::str::from_utf8(bytes)
                .map_err(|e| TypeError::InvalidData(format!("invalid UTF-8 in array: {}", e)))?;
            decode_text(reg, session, element_oid, text)
        }
    }
}

fn read_i32(bytes: &[u8], pos: usize) -> Result<i32, TypeError> {
    bytes
        .get(pos..pos + 4)
        .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| TypeError::InvalidData("array data truncated".to_string()))
}

fn decode_binary_payload(
    reg: &TypeRegistry,
    session: &SessionParams,
    bytes: &[u8],
) -> Result<Value, TypeError> {
    let ndim = read_i32(bytes, 0)?;
    let _has_nulls = read_i32(bytes, 4)?;
    let element_oid = read_i32(bytes, 8)? as u32;
    if ndim == 0 {
        return Ok(Value::Array(Vec::new()));
    }
    if !(1..=6).contains(&ndim) {
        return Err(TypeError::InvalidData(format!("invalid array dimension count {}", ndim)));
    }

    let mut dims = Vec::with_capacity(ndim as usize);
    let mut pos = 12;
    for _ in 0..ndim {
        let len = read_i32(bytes, pos)?;
        let _lower_bound = read_i32(bytes, pos + 4)?;
        if len < 0 {
            return Err(TypeError::InvalidData("negative array dimension".to_string()));
        }
        dims.push(len as usize);
        pos += 8;
    }

    let count: usize = dims.iter().product();
    let mut flat = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_i32(bytes, pos)?;
        pos += 4;
        if len == -1 {
            flat.push(Value::Null);
        } else {
            let len = len as usize;
            let data = bytes
                .get(pos..pos + len)
                .ok_or_else(|| TypeError::InvalidData("array element truncated".to_string()))?;
            flat.push(reg.decode(session, element_oid, Format::Binary, Some(data))?);
            pos += len;
        }
    }

    Ok(reshape(flat, &dims))
}

/// Rebuild the nested structure from a flat row-major element list.
fn reshape(flat: Vec<Value>, dims: &[usize]) -> Value {
    let mut values = flat;
    for &len in dims[1..].iter().rev() {
        if len == 0 {
            return Value::Array(Vec::new());
        }
        values = values
            .chunks(len)
            .map(|chunk| Value::Array(chunk.to_vec()))
            .collect();
    }
    Value::Array(values)
}

fn decode_text(
    reg: &TypeRegistry,
    session: &SessionParams,
    element_oid: u32,
    text: &str,
) -> Result<Value, TypeError> {
    let bytes = text.trim().as_bytes();
    let mut pos = 0;
    let values = parse_level(reg, session, element_oid, bytes, &mut pos)?;
    Ok(Value::Array(values))
}

fn parse_level(
    reg: &TypeRegistry,
    session: &SessionParams,
    element_oid: u32,
    bytes: &[u8],
    pos: &mut usize,
) -> Result<Vec<Value>, TypeError> {
    if bytes.get(*pos) != Some(&b'{') {
        return Err(TypeError::InvalidData("array text must start with '{'".to_string()));
    }
    *pos += 1;
    let mut out = Vec::new();
    loop {
        match bytes.get(*pos) {
            Some(b'}') => {
                *pos += 1;
                return Ok(out);
            }
            Some(b',') => {
                *pos += 1;
            }
            Some(b'{') => {
                out.push(Value::Array(parse_level(reg, session, element_oid, bytes, pos)?));
            }
            Some(b'"') => {
                *pos += 1;
                let mut elem = Vec::new();
                loop {
                    match bytes.get(*pos) {
                        Some(b'\\') => {
                            let escaped = bytes.get(*pos + 1).ok_or_else(|| {
                                TypeError::InvalidData("dangling escape in array text".to_string())
                            })?;
                            elem.push(*escaped);
                            *pos += 2;
                        }
                        Some(b'"') => {
                            *pos += 1;
                            break;
                        }
                        Some(b) => {
                            elem.push(*b);
                            *pos += 1;
                        }
                        None => {
                            return Err(TypeError::InvalidData(
                                "unterminated quoted array element".to_string(),
                            ))
                        }
                    }
                }
                out.push(reg.decode(session, element_oid, Format::Text, Some(&elem))?);
            }
            Some(_) => {
                let start = *pos;
                while let Some(&b) = bytes.get(*pos) {
                    if b == b',' || b == b'}' {
                        break;
                    }
                    *pos += 1;
                }
                let token = &bytes[start..*pos];
                if token.eq_ignore_ascii_case(b"NULL") {
                    out.push(Value::Null);
                } else {
                    out.push(reg.decode(session, element_oid, Format::Text, Some(token))?);
                }
            }
            None => {
                return Err(TypeError::InvalidData("unterminated array text".to_string()));
            }
        }
    }
}

/// What all elements of an outgoing array have in common.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Text,
    Numeric,
}

impl ElementKind {
    fn element_oid(self) -> u32 {
        match self {
            ElementKind::Bool => oid::BOOL,
            ElementKind::Int2 => oid::INT2,
            ElementKind::Int4 => oid::INT4,
            ElementKind::Int8 => oid::INT8,
            ElementKind::Float4 => oid::FLOAT4,
            ElementKind::Float8 => oid::FLOAT8,
            ElementKind::Text => oid::TEXT,
            ElementKind::Numeric => oid::NUMERIC,
        }
    }
}

/// Pick the element type for an outgoing array. Integers narrow to the
/// smallest width that holds every element; anything else must be a single
/// variant. Arrays with no non-null element go out as text[].
fn plan_elements(flat: &[&Value]) -> Result<ElementKind, TypeError> {
    let mut kind: Option<ElementKind> = None;
    let mut int_min: i64 = 0;
    let mut int_max: i64 = 0;

    for v in flat {
        let this = match v {
            Value::Null => continue,
            Value::Bool(_) => ElementKind::Bool,
            Value::Int2(_) | Value::Int4(_) | Value::Int8(_) => {
                let n = v.as_i64().unwrap();
                int_min = int_min.min(n);
                int_max = int_max.max(n);
                ElementKind::Int8
            }
            Value::Float4(_) => ElementKind::Float4,
            Value::Float8(_) => ElementKind::Float8,
            Value::Text(_) => ElementKind::Text,
            Value::Numeric(_) => ElementKind::Numeric,
            other => {
                return Err(TypeError::Unencodable(format!(
                    "{:?} not supported as array contents",
                    other
                )))
            }
        };
        match kind {
            None => kind = Some(this),
            Some(prev) if prev == this => {}
            Some(_) => {
                return Err(TypeError::Unencodable(
                    "array elements are not all of the same type".to_string(),
                ))
            }
        }
    }

    Ok(match kind {
        None => ElementKind::Text,
        Some(ElementKind::Int8) => {
            if int_min >= i16::MIN as i64 && int_max <= i16::MAX as i64 {
                ElementKind::Int2
            } else if int_min >= i32::MIN as i64 && int_max <= i32::MAX as i64 {
                ElementKind::Int4
            } else {
                ElementKind::Int8
            }
        }
        Some(kind) => kind,
    })
}

/// Dimension lengths, verifying the tree is rectangular.
fn collect_dims(values: &[Value], dims: &mut Vec<usize>, depth: usize) -> Result<(), TypeError> {
    if depth == dims.len() {
        dims.push(values.len());
    } else if dims[depth] != values.len() {
        return Err(TypeError::Unencodable(
            "array dimensions are not consistent".to_string(),
        ));
    }
    let has_sub = values.iter().any(|v| matches!(v, Value::Array(_)));
    if has_sub {
        for v in values {
            match v {
                Value::Array(inner) => collect_dims(inner, dims, depth + 1)?,
                _ => {
                    return Err(TypeError::Unencodable(
                        "array mixes sub-arrays and scalar elements".to_string(),
                    ))
                }
            }
        }
    }
    Ok(())
}

fn flatten<'a>(values: &'a [Value], out: &mut Vec<&'a Value>) {
    for v in values {
        match v {
            Value::Array(inner) => flatten(inner, out),
            other => out.push(other),
        }
    }
}

/// The array OID an outgoing array will be declared as.
pub fn infer_oid(values: &[Value]) -> Result<u32, TypeError> {
    let mut flat = Vec::new();
    flatten(values, &mut flat);
    let kind = plan_elements(&flat)?;
    oid::array_of(kind.element_oid())
        .ok_or_else(|| TypeError::Unencodable("no array type for element".to_string()))
}

/// Encode an outgoing array: `(array_oid, payload)`.
pub fn encode_binary(values: &[Value], _session: &SessionParams) -> Result<(u32, Vec<u8>), TypeError> {
    let mut dims = Vec::new();
    collect_dims(values, &mut dims, 0)?;
    let mut flat = Vec::new();
    flatten(values, &mut flat);

    let kind = plan_elements(&flat)?;
    let element_oid = kind.element_oid();
    let array_oid = oid::array_of(element_oid)
        .ok_or_else(|| TypeError::Unencodable("no array type for element".to_string()))?;
    let has_nulls = flat.iter().any(|v| v.is_null());

    // An empty outer array goes out with zero dimensions.
    if values.is_empty() {
        dims.clear();
    }

    let mut out = Vec::with_capacity(12 + dims.len() * 8 + flat.len() * 8);
    out.extend_from_slice(&(dims.len() as i32).to_be_bytes());
    out.extend_from_slice(&(has_nulls as i32).to_be_bytes());
    out.extend_from_slice(&element_oid.to_be_bytes());
    for &len in &dims {
        out.extend_from_slice(&(len as i32).to_be_bytes());
        out.extend_from_slice(&1i32.to_be_bytes()); // lower bound
    }
    for v in flat {
        match encode_element(kind, v)? {
            None => out.extend_from_slice(&(-1i32).to_be_bytes()),
            Some(data) => {
                out.extend_from_slice(&(data.len() as i32).to_be_bytes());
                out.extend_from_slice(&data);
            }
        }
    }
    Ok((array_oid, out))
}

fn encode_element(kind: ElementKind, v: &Value) -> Result<Option<Vec<u8>>, TypeError> {
    if v.is_null() {
        return Ok(None);
    }
    Ok(Some(match kind {
        ElementKind::Bool => vec![v.as_bool().unwrap() as u8],
        ElementKind::Int2 => (v.as_i64().unwrap() as i16).to_be_bytes().to_vec(),
        ElementKind::Int4 => (v.as_i64().unwrap() as i32).to_be_bytes().to_vec(),
        ElementKind::Int8 => v.as_i64().unwrap().to_be_bytes().to_vec(),
        ElementKind::Float4 => match v {
            Value::Float4(f) => f.to_be_bytes().to_vec(),
            _ => unreachable!("planned as float4"),
        },
        ElementKind::Float8 => match v {
            Value::Float8(f) => f.to_be_bytes().to_vec(),
            _ => unreachable!("planned as float8"),
        },
        ElementKind::Text => match v {
            Value::Text(s) => s.as_bytes().to_vec(),
            _ => unreachable!("planned as text"),
        },
        ElementKind::Numeric => match v {
            Value::Numeric(n) => {
                super::numeric::encode_binary(n.as_str()).map_err(TypeError::InvalidData)?
            }
            _ => unreachable!("planned as numeric"),
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Numeric;

    fn reg() -> TypeRegistry {
        TypeRegistry::builtin()
    }

    fn session() -> SessionParams {
        SessionParams::default()
    }

    fn int_array(values: &[Option<i64>]) -> Value {
        Value::Array(
            values
                .iter()
                .map(|v| match v {
                    Some(n) => Value::int(*n),
                    None => Value::Null,
                })
                .collect(),
        )
    }

    fn decode_round_trip(v: &Value) -> Value {
        let values = match v {
            Value::Array(values) => values,
            _ => panic!("not an array"),
        };
        let (array_oid, payload) = encode_binary(values, &session()).unwrap();
        reg().decode(&session(), array_oid, Format::Binary, Some(&payload)).unwrap()
    }

    #[test]
    fn test_binary_round_trip_with_nulls() {
        let v = int_array(&[Some(1), Some(2), None, Some(4)]);
        assert_eq!(decode_round_trip(&v), v);
    }

    #[test]
    fn test_text_and_binary_agree() {
        // The same value regardless of transfer format.
        let from_text = reg()
            .decode(&session(), oid::INT4_ARRAY, Format::Text, Some(b"{1,2,NULL,4}"))
            .unwrap();
        let expected = Value::Array(vec![
            Value::Int4(1),
            Value::Int4(2),
            Value::Null,
            Value::Int4(4),
        ]);
        assert_eq!(from_text, expected);
    }

    #[test]
    fn test_text_quoted_elements() {
        let v = reg()
            .decode(
                &session(),
                oid::TEXT_ARRAY,
                Format::Text,
                Some(br#"{"hello, world",plain,"with \"quote\"",NULL}"#.as_slice()),
            )
            .unwrap();
        assert_eq!(
            v,
            Value::Array(vec![
                Value::Text("hello, world".to_string()),
                Value::Text("plain".to_string()),
                Value::Text("with \"quote\"".to_string()),
                Value::Null,
            ])
        );
    }

    #[test]
    fn test_empty_array_round_trip() {
        let v = Value::Array(Vec::new());
        assert_eq!(decode_round_trip(&v), v);
        let from_text = reg()
            .decode(&session(), oid::INT4_ARRAY, Format::Text, Some(b"{}"))
            .unwrap();
        assert_eq!(from_text, v);
    }

    #[test]
    fn test_nested_array_round_trip() {
        let v = Value::Array(vec![
            Value::Array(vec![Value::Int2(1), Value::Null]),
            Value::Array(vec![Value::Int2(3), Value::Int2(4)]),
        ]);
        assert_eq!(decode_round_trip(&v), v);
    }

    #[test]
    fn test_nested_text_parse() {
        let v = reg()
            .decode(&session(), oid::INT4_ARRAY, Format::Text, Some(b"{{1,2},{3,4}}"))
            .unwrap();
        assert_eq!(
            v,
            Value::Array(vec![
                Value::Array(vec![Value::Int4(1), Value::Int4(2)]),
                Value::Array(vec![Value::Int4(3), Value::Int4(4)]),
            ])
        );
    }

    #[test]
    fn test_integer_narrowing_across_elements() {
        assert_eq!(infer_oid(&[Value::int(1), Value::int(2)]).unwrap(), oid::INT2_ARRAY);
        assert_eq!(infer_oid(&[Value::int(1), Value::int(70_000)]).unwrap(), oid::INT4_ARRAY);
        assert_eq!(
            infer_oid(&[Value::int(1), Value::Int8(5_000_000_000)]).unwrap(),
            oid::INT8_ARRAY
        );
    }

    #[test]
    fn test_mixed_elements_rejected() {
        let err = infer_oid(&[Value::Int4(1), Value::Text("x".to_string())]).unwrap_err();
        assert!(matches!(err, TypeError::Unencodable(_)));
    }

    #[test]
    fn test_ragged_dimensions_rejected() {
        let v = vec![
            Value::Array(vec![Value::Int4(1), Value::Int4(2)]),
            Value::Array(vec![Value::Int4(3)]),
        ];
        let err = encode_binary(&v, &session()).unwrap_err();
        assert!(matches!(err, TypeError::Unencodable(_)));
    }

    #[test]
    fn test_numeric_and_text_arrays_encode() {
        let v = Value::Array(vec![
            Value::Numeric(Numeric::new("1.5")),
            Value::Numeric(Numeric::new("-2.25")),
        ]);
        assert_eq!(decode_round_trip(&v), v);

        let v = Value::Array(vec![Value::Text("a,b".to_string()), Value::Null]);
        assert_eq!(decode_round_trip(&v), v);
    }

    #[test]
    fn test_all_null_array_goes_out_as_text() {
        assert_eq!(infer_oid(&[Value::Null]).unwrap(), oid::TEXT_ARRAY);
    }
}
