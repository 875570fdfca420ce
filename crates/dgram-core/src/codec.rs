//! Self-describing payloads for arguments, return values and failures.
//!
//! Every value crossing the call boundary is carried as a [`Payload`]: the
//! type tag of the value plus its JSON encoding. On the wire a payload is
//!
//! ```text
//! [u16 BE: tag len][UTF-8 tag][JSON body]
//! ```
//!
//! Decoding checks the tag before touching the body. A tag that differs from
//! the requested type is a [`RpcError::TypeMismatch`]; a tag this process has
//! never registered is a [`RpcError::UnresolvableType`].

use crate::error::{Failure, Result, RpcError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{LazyLock, RwLock};

/// A value that can travel as an argument or return value.
///
/// `TYPE_TAG` must be unique per Rust type across every process that
/// exchanges payloads. The body is JSON unless a type overrides
/// [`encode_body`](Self::encode_body) and [`decode_body`](Self::decode_body).
pub trait RpcType: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE_TAG: &'static str;

    fn encode_body(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    fn decode_body(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }
}

macro_rules! builtin_types {
    ($($ty:ty => $tag:literal),* $(,)?) => {
        $(
            impl RpcType for $ty {
                const TYPE_TAG: &'static str = $tag;
            }
        )*

        const BUILTIN_TAGS: &[&str] = &[$($tag,)* F64_TAG];
    };
}

builtin_types! {
    () => "unit",
    bool => "bool",
    i32 => "i32",
    i64 => "i64",
    u32 => "u32",
    u64 => "u64",
    String => "String",
    Vec<i32> => "i32[]",
    Vec<i64> => "i64[]",
    Vec<String> => "String[]",
    Failure => "failure",
}

const F64_TAG: &str = "f64";

// JSON has no literal for these, so they travel as strings.
const F64_INFINITY: &str = "inf";
const F64_NEG_INFINITY: &str = "-inf";
const F64_NAN: &str = "NaN";

impl RpcType for f64 {
    const TYPE_TAG: &'static str = F64_TAG;

    fn encode_body(&self) -> serde_json::Result<Vec<u8>> {
        if self.is_finite() {
            return serde_json::to_vec(self);
        }
        let text = if self.is_nan() {
            F64_NAN
        } else if self.is_sign_positive() {
            F64_INFINITY
        } else {
            F64_NEG_INFINITY
        };
        serde_json::to_vec(text)
    }

    fn decode_body(body: &[u8]) -> serde_json::Result<Self> {
        use serde::de::Error;

        match serde_json::from_slice::<serde_json::Value>(body)? {
            serde_json::Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| serde_json::Error::custom(format!("{} is not an f64", n))),
            serde_json::Value::String(s) => match s.as_str() {
                F64_INFINITY => Ok(f64::INFINITY),
                F64_NEG_INFINITY => Ok(f64::NEG_INFINITY),
                F64_NAN => Ok(f64::NAN),
                other => Err(serde_json::Error::custom(format!(
                    "unknown f64 literal {:?}",
                    other
                ))),
            },
            other => Err(serde_json::Error::custom(format!(
                "invalid type: {}, expected f64",
                other
            ))),
        }
    }
}

static KNOWN_TYPES: LazyLock<RwLock<HashSet<&'static str>>> =
    LazyLock::new(|| RwLock::new(BUILTIN_TAGS.iter().copied().collect()));

/// Make a type's tag known to this process so payloads carrying it resolve.
///
/// Built-in types are always known. Procedure registration calls this for
/// every argument and return type it sees.
pub fn register_type<T: RpcType>() {
    let mut known = KNOWN_TYPES.write().unwrap_or_else(|e| e.into_inner());
    known.insert(T::TYPE_TAG);
}

/// Whether a type tag can be mapped to a type known to this process.
pub fn is_known(type_tag: &str) -> bool {
    let known = KNOWN_TYPES.read().unwrap_or_else(|e| e.into_inner());
    known.contains(type_tag)
}

/// An encoded value together with the tag of the type it was encoded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    type_tag: String,
    body: Bytes,
}

impl Payload {
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Encode into the wire form carried inside an envelope.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.type_tag.len() + self.body.len());
        buf.put_u16(self.type_tag.len() as u16);
        buf.put_slice(self.type_tag.as_bytes());
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Parse the wire form. Only framing is checked; the tag is not resolved.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        if buf.remaining() < 2 {
            return Err(decode_error("payload shorter than its tag header"));
        }
        let tag_len = buf.get_u16() as usize;
        if buf.remaining() < tag_len {
            return Err(decode_error("payload tag runs past the end of the data"));
        }
        let type_tag = std::str::from_utf8(&buf[..tag_len])
            .map_err(|_| decode_error("payload tag is not valid UTF-8"))?
            .to_string();
        buf.advance(tag_len);

        Ok(Self {
            type_tag,
            body: Bytes::copy_from_slice(buf),
        })
    }
}

/// Encode a value with its type tag.
///
/// # Panics
///
/// Panics if the value's `Serialize` implementation fails. Every built-in
/// type encodes infallibly, so this only happens for a broken user type.
pub fn serialize<T: RpcType>(value: &T) -> Payload {
    let body = match value.encode_body() {
        Ok(body) => body,
        Err(e) => panic!("failed to serialize {} value: {}", T::TYPE_TAG, e),
    };
    Payload {
        type_tag: T::TYPE_TAG.to_string(),
        body: Bytes::from(body),
    }
}

/// Decode a payload into the caller's expected type.
pub fn deserialize<T: RpcType>(payload: &Payload) -> Result<T> {
    if payload.type_tag != T::TYPE_TAG {
        if !is_known(&payload.type_tag) {
            return Err(RpcError::UnresolvableType {
                type_tag: payload.type_tag.clone(),
            });
        }
        return Err(RpcError::TypeMismatch {
            expected: T::TYPE_TAG.to_string(),
            actual: payload.type_tag.clone(),
        });
    }

    T::decode_body(&payload.body).map_err(|e| RpcError::ProtocolDecode {
        message: format!("malformed {} payload: {}", T::TYPE_TAG, e),
    })
}

/// Parse a list of wire payloads, order preserved.
///
/// Fails on the first element that is malformed or carries a tag this
/// process cannot resolve.
pub fn deserialize_list<B: AsRef<[u8]>>(data: &[B]) -> Result<Vec<Payload>> {
    data.iter()
        .map(|bytes| {
            let payload = Payload::from_bytes(bytes.as_ref())?;
            if !is_known(&payload.type_tag) {
                return Err(RpcError::UnresolvableType {
                    type_tag: payload.type_tag,
                });
            }
            Ok(payload)
        })
        .collect()
}

fn decode_error(message: &str) -> RpcError {
    RpcError::ProtocolDecode {
        message: message.to_string(),
    }
}

/// Conversion of a tuple of values into an ordered argument list.
pub trait IntoArgs {
    fn into_args(self) -> Vec<Payload>;
}

impl IntoArgs for Vec<Payload> {
    fn into_args(self) -> Vec<Payload> {
        self
    }
}

macro_rules! impl_into_args {
    ($($name:ident),*) => {
        impl<$($name: RpcType),*> IntoArgs for ($($name,)*) {
            #[allow(non_snake_case)]
            fn into_args(self) -> Vec<Payload> {
                let ($($name,)*) = self;
                vec![$(serialize(&$name)),*]
            }
        }
    };
}

impl IntoArgs for () {
    fn into_args(self) -> Vec<Payload> {
        Vec::new()
    }
}

impl_into_args!(A);
impl_into_args!(A, B);
impl_into_args!(A, B, C);
impl_into_args!(A, B, C, D);
impl_into_args!(A, B, C, D, E);
impl_into_args!(A, B, C, D, E, F);
impl_into_args!(A, B, C, D, E, F, G);
impl_into_args!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    impl RpcType for Point {
        const TYPE_TAG: &'static str = "test.Point";
    }

    #[test]
    fn test_builtin_values_survive_the_wire() {
        let payload = Payload::from_bytes(&serialize(&vec![12, 4, 1, 3]).to_bytes()).unwrap();
        assert_eq!(payload.type_tag(), "i32[]");
        assert_eq!(deserialize::<Vec<i32>>(&payload).unwrap(), vec![12, 4, 1, 3]);

        let failure = Failure::new("IllegalArgument", "negative").with_cause(Failure::new("X", "y"));
        let payload = Payload::from_bytes(&serialize(&failure).to_bytes()).unwrap();
        assert_eq!(deserialize::<Failure>(&payload).unwrap(), failure);

        let payload = Payload::from_bytes(&serialize(&()).to_bytes()).unwrap();
        assert!(deserialize::<()>(&payload).is_ok());
    }

    fn through_wire<T: RpcType>(value: &T) -> T {
        let payload = Payload::from_bytes(&serialize(value).to_bytes()).unwrap();
        assert_eq!(payload.type_tag(), T::TYPE_TAG);
        deserialize(&payload).unwrap()
    }

    #[test]
    fn test_every_builtin_type_survives_the_wire() {
        through_wire(&());
        assert!(through_wire(&true));
        assert_eq!(through_wire(&i32::MIN), i32::MIN);
        assert_eq!(through_wire(&i64::MAX), i64::MAX);
        assert_eq!(through_wire(&u32::MAX), u32::MAX);
        assert_eq!(through_wire(&u64::MAX), u64::MAX);
        assert_eq!(through_wire(&"héllo".to_string()), "héllo");
        assert_eq!(through_wire(&vec![-1i64, 0, 1]), vec![-1i64, 0, 1]);
        assert_eq!(through_wire(&vec!["a".to_string()]), vec!["a".to_string()]);
        assert_eq!(through_wire(&Vec::<i32>::new()), Vec::<i32>::new());

        for value in [0.0f64, -0.0, 1.5, f64::MIN_POSITIVE, f64::MAX, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(through_wire(&value), value);
        }
        assert!(through_wire(&f64::NAN).is_nan());

        let tags: HashSet<&str> = BUILTIN_TAGS.iter().copied().collect();
        assert_eq!(tags.len(), BUILTIN_TAGS.len());
        assert!(tags.contains("f64"));
    }

    #[test]
    fn test_unknown_float_literal_is_decode_error() {
        let mut wire = BytesMut::new();
        wire.put_u16(3);
        wire.put_slice(b"f64");
        wire.put_slice(b"\"infinity-ish\"");
        let payload = Payload::from_bytes(&wire).unwrap();
        assert!(matches!(
            deserialize::<f64>(&payload),
            Err(RpcError::ProtocolDecode { .. })
        ));
    }

    #[test]
    fn test_wrong_known_type_is_mismatch() {
        let payload = serialize(&"eight".to_string());
        match deserialize::<i32>(&payload) {
            Err(RpcError::TypeMismatch { expected, actual }) => {
                assert_eq!(expected, "i32");
                assert_eq!(actual, "String");
            }
            other => panic!("Expected TypeMismatch, got: {:?}", other),
        }
    }

    #[test]
    fn test_unregistered_tag_is_unresolvable() {
        let payload = serialize(&Point { x: 1, y: 2 });
        assert!(!is_known("test.Point"));
        assert!(matches!(
            deserialize::<i32>(&payload),
            Err(RpcError::UnresolvableType { .. })
        ));
        assert!(matches!(
            deserialize_list(&[payload.to_bytes()]),
            Err(RpcError::UnresolvableType { .. })
        ));
    }

    #[test]
    fn test_registered_user_type_resolves() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Tagged(String);

        impl RpcType for Tagged {
            const TYPE_TAG: &'static str = "test.Tagged";
        }

        register_type::<Tagged>();
        let wire = serialize(&Tagged("a".into())).to_bytes();
        let list = deserialize_list(&[wire]).unwrap();
        assert_eq!(deserialize::<Tagged>(&list[0]).unwrap(), Tagged("a".into()));
        assert!(matches!(
            deserialize::<String>(&list[0]),
            Err(RpcError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_deserialize_list_fails_on_first_bad_element() {
        let good = serialize(&1i32).to_bytes();
        let truncated = Bytes::from_static(&[0, 9, b'i']);
        let result = deserialize_list(&[good.clone(), truncated, good]);
        assert!(matches!(result, Err(RpcError::ProtocolDecode { .. })));
    }

    #[test]
    fn test_malformed_body_is_decode_error() {
        let mut wire = BytesMut::new();
        wire.put_u16(3);
        wire.put_slice(b"i32");
        wire.put_slice(b"\"not a number\"");
        let payload = Payload::from_bytes(&wire).unwrap();
        assert!(matches!(
            deserialize::<i32>(&payload),
            Err(RpcError::ProtocolDecode { .. })
        ));
    }

    #[test]
    fn test_tuple_into_args_keeps_order() {
        let args = (1i32, "two".to_string(), true).into_args();
        let tags: Vec<_> = args.iter().map(Payload::type_tag).collect();
        assert_eq!(tags, vec!["i32", "String", "bool"]);
        assert!(().into_args().is_empty());
    }
}
