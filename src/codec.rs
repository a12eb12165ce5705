//! Tolerant wire codecs.
//!
//! The API spells the same enumerated value several ways over time: a
//! snake_case string, a differently cased string, an ordinal, or nothing at
//! all. Enumerations declared with [`wire_enum!`] decode every one of those
//! shapes and never fail on an unrecognized string or ordinal; they fall back
//! to their first declared member instead. Encoding always emits the
//! registered wire string.
//!
//! Tagged unions (`{"type": ..., "<type>": {...}}`) implement [`TaggedUnion`]
//! and decode through [`decode_union`], which maps `null` and bare strings to
//! the union's fallback variant.

use std::{fmt, marker::PhantomData};

use convert_case::{Case, Casing};
use serde::de::{self, Deserializer, Visitor};
use serde_json::{Map, Value};

/// Member ↔ wire name ↔ ordinal table of one enumeration, built once.
#[derive(Debug)]
pub struct WireTable<T: 'static> {
    entries: Vec<(T, String)>,
}

impl<T: Copy + PartialEq> WireTable<T> {
    /// Builds the table from `(member, member name, wire override)` triples in
    /// declaration order. Members without an override use the snake_case form
    /// of their name.
    pub fn build(declared: &[(T, &str, Option<&str>)]) -> Self {
        let entries = declared
            .iter()
            .map(|(member, name, wire)| {
                let wire = match wire {
                    Some(wire) => (*wire).to_owned(),
                    None => name.to_case(Case::Snake),
                };
                (*member, wire)
            })
            .collect();

        Self { entries }
    }

    /// Exact lookup after normalization; `None` when nothing matches.
    pub fn lookup(&self, raw: &str) -> Option<T> {
        if let Some((member, _)) = self.entries.iter().find(|(_, wire)| wire == raw) {
            return Some(*member);
        }

        let normalized = raw.to_case(Case::Snake);
        self.entries
            .iter()
            .find(|(_, wire)| *wire == normalized)
            .map(|(member, _)| *member)
    }

    pub fn ordinal(&self, ordinal: i64) -> Option<T> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|ordinal| self.entries.get(ordinal))
            .map(|(member, _)| *member)
    }

    pub fn ordinal_of(&self, member: T) -> usize {
        self.entries
            .iter()
            .position(|(candidate, _)| *candidate == member)
            .unwrap_or_default()
    }

    pub fn wire_name(&'static self, member: T) -> &'static str {
        self.entries
            .iter()
            .find(|(candidate, _)| *candidate == member)
            .map(|(_, wire)| wire.as_str())
            .unwrap_or_default()
    }

    pub fn members(&self) -> impl Iterator<Item = T> + '_ {
        self.entries.iter().map(|(member, _)| *member)
    }
}

/// An enumeration with a static wire table. Implemented by [`wire_enum!`].
pub trait WireEnum: Copy + Eq + 'static {
    /// The enumeration's name, used in decode error messages.
    const NAME: &'static str;

    fn table() -> &'static WireTable<Self>;

    /// The designated zero-value member every unrecognized input decodes to.
    fn zero() -> Self;

    fn wire_name(&self) -> &'static str {
        Self::table().wire_name(*self)
    }

    fn ordinal(&self) -> usize {
        Self::table().ordinal_of(*self)
    }

    /// Decodes a string, falling back to [`WireEnum::zero`].
    fn from_wire(raw: &str) -> Self {
        Self::table().lookup(raw).unwrap_or_else(Self::zero)
    }

    /// Decodes an ordinal, falling back to [`WireEnum::zero`].
    fn from_ordinal(ordinal: i64) -> Self {
        Self::table().ordinal(ordinal).unwrap_or_else(Self::zero)
    }

    /// Decodes an already parsed value. Never fails.
    fn from_json(raw: &Value) -> Self {
        match raw {
            Value::String(raw) => Self::from_wire(raw),
            Value::Number(number) => number.as_i64().map_or_else(Self::zero, Self::from_ordinal),
            _ => Self::zero(),
        }
    }
}

struct WireVisitor<T>(PhantomData<T>);

impl<'de, T: WireEnum> Visitor<'de> for WireVisitor<T> {
    type Value = T;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a `{}` name or ordinal", T::NAME)
    }

    fn visit_str<E>(self, v: &str) -> Result<T, E>
    where
        E: de::Error,
    {
        Ok(T::from_wire(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<T, E>
    where
        E: de::Error,
    {
        Ok(T::from_ordinal(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<T, E>
    where
        E: de::Error,
    {
        Ok(i64::try_from(v).map_or_else(|_| T::zero(), T::from_ordinal))
    }

    fn visit_unit<E>(self) -> Result<T, E>
    where
        E: de::Error,
    {
        Ok(T::zero())
    }

    fn visit_none<E>(self) -> Result<T, E>
    where
        E: de::Error,
    {
        Ok(T::zero())
    }

    fn visit_some<D>(self, deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(self)
    }
}

/// `Deserialize` body shared by every [`wire_enum!`] type.
///
/// Objects and arrays are still rejected so untagged unions can try their
/// next alternative.
pub fn deserialize_wire<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: WireEnum,
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(WireVisitor(PhantomData))
}

/// Declares an enumeration with a static wire table.
///
/// Members are written in ordinal order; the first one is the zero-value.
/// `Member = "wire_name"` overrides the snake_case wire name.
///
/// ```
/// openai_assistants::wire_enum! {
///     pub enum Format {
///         Auto,
///         Text,
///         Json = "json_object",
///     }
/// }
///
/// use openai_assistants::codec::WireEnum;
///
/// assert_eq!(Format::Json.wire_name(), "json_object");
/// assert_eq!(Format::from_wire("brand_new_format"), Format::Auto);
/// assert_eq!(Format::from_ordinal(1), Format::Text);
/// ```
#[macro_export]
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$member_meta:meta])* $member:ident $(= $wire:literal)? ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis enum $name {
            $( $(#[$member_meta])* $member ),+
        }

        impl $crate::codec::WireEnum for $name {
            const NAME: &'static str = stringify!($name);

            fn table() -> &'static $crate::codec::WireTable<Self> {
                static TABLE: ::std::sync::OnceLock<$crate::codec::WireTable<$name>> =
                    ::std::sync::OnceLock::new();
                TABLE.get_or_init(|| {
                    $crate::codec::WireTable::build(&[
                        $( ($name::$member, stringify!($member), $crate::wire_enum!(@wire $($wire)?)) ),+
                    ])
                })
            }

            fn zero() -> Self {
                $crate::wire_enum!(@zero $name; $($member),+)
            }
        }

        impl ::std::default::Default for $name {
            fn default() -> Self {
                <Self as $crate::codec::WireEnum>::zero()
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str($crate::codec::WireEnum::wire_name(self))
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = ::std::convert::Infallible;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                Ok(<Self as $crate::codec::WireEnum>::from_wire(s))
            }
        }

        impl $crate::__private::serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error>
            where
                S: $crate::__private::serde::Serializer,
            {
                serializer.serialize_str($crate::codec::WireEnum::wire_name(self))
            }
        }

        impl<'de> $crate::__private::serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> ::std::result::Result<Self, D::Error>
            where
                D: $crate::__private::serde::Deserializer<'de>,
            {
                $crate::codec::deserialize_wire(deserializer)
            }
        }
    };
    (@wire) => { ::std::option::Option::None };
    (@wire $wire:literal) => { ::std::option::Option::Some($wire) };
    (@zero $name:ident; $first:ident $(, $rest:ident)*) => { $name::$first };
}

/// A value whose wire shape is an object discriminated by a `type` member.
pub trait TaggedUnion: Sized {
    type Kind: WireEnum;

    /// What `null` or a bare string decodes to.
    fn fallback() -> Self;

    /// Builds the variant for `kind` from the object's members, `type`
    /// included so an unrecognized variant can be kept as received.
    fn from_parts(kind: Self::Kind, body: Map<String, Value>) -> Result<Self, serde_json::Error>;

    fn kind(&self) -> Self::Kind;
}

/// Decodes a [`TaggedUnion`] from any of its wire shapes.
pub fn decode_union<T: TaggedUnion>(raw: Value) -> Result<T, serde_json::Error> {
    match raw {
        Value::Null | Value::String(_) => Ok(T::fallback()),
        Value::Object(body) => {
            let kind = body.get("type").map_or_else(T::Kind::zero, T::Kind::from_json);
            T::from_parts(kind, body)
        }
        other => Err(de::Error::custom(format!(
            "expected null, a string or an object with a `type` member, found {other}"
        ))),
    }
}

/// Removes and decodes the payload member of a union body, if present.
pub fn take_payload<P>(body: &mut Map<String, Value>, key: &str) -> Result<Option<P>, serde_json::Error>
where
    P: de::DeserializeOwned,
{
    body.remove(key)
        .filter(|payload| !payload.is_null())
        .map(serde_json::from_value)
        .transpose()
}
