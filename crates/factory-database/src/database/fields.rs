//! `col=:col` fragments for named-parameter statements.
//!
//! Types describe their columns with [`SqlFields`], usually through the
//! [`sql_fields!`](crate::sql_fields) macro:
//!
//! ```
//! use factory_database::{fields, sql_fields};
//!
//! struct User {
//!     id: i64,
//!     name: String,
//!     title: String,
//! }
//!
//! sql_fields!(User {
//!     id = "id",
//!     name = "name,omitempty",
//!     title = "-",
//! });
//!
//! assert_eq!(fields::set::<User>(&["id"]), "id=:id");
//! ```

use std::collections::BTreeMap;

/// One struct field and its optional column tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub field: &'static str,
    pub tag: Option<&'static str>,
}

impl FieldDescriptor {
    pub const fn tagged(field: &'static str, tag: &'static str) -> Self {
        Self {
            field,
            tag: Some(tag),
        }
    }

    pub const fn untagged(field: &'static str) -> Self {
        Self { field, tag: None }
    }

    /// Column name, or `None` for fields tagged `"-"`.
    ///
    /// Modifiers after the first comma are dropped; an empty or missing tag
    /// name falls back to the lower-cased field name.
    pub fn column(&self) -> Option<String> {
        let name = match self.tag {
            Some("-") => return None,
            Some(tag) => tag.split(',').next().unwrap_or_default().trim(),
            None => "",
        };

        if name.is_empty() {
            Some(self.field.to_lowercase())
        } else {
            Some(name.to_string())
        }
    }
}

/// Field descriptors for a type whose values are bound by column name.
pub trait SqlFields {
    const FIELDS: &'static [FieldDescriptor];
}

/// Implement [`SqlFields`] from a field list.
///
/// `field = "tag"` uses the tag, a bare `field` falls back to its
/// lower-cased name.
#[macro_export]
macro_rules! sql_fields {
    (@field $field:ident = $tag:literal) => {
        $crate::FieldDescriptor::tagged(stringify!($field), $tag)
    };
    (@field $field:ident) => {
        $crate::FieldDescriptor::untagged(stringify!($field))
    };
    ($ty:ty { $($field:ident $(= $tag:literal)?),* $(,)? }) => {
        impl $crate::SqlFields for $ty {
            const FIELDS: &'static [$crate::FieldDescriptor] = &[
                $($crate::sql_fields!(@field $field $(= $tag)?)),*
            ];
        }
    };
}

/// `column -> ":column"` for every included field of `T`.
pub fn set_map<T: SqlFields>() -> BTreeMap<String, String> {
    T::FIELDS
        .iter()
        .filter_map(FieldDescriptor::column)
        .map(|column| {
            let placeholder = format!(":{column}");
            (column, placeholder)
        })
        .collect()
}

/// `"a=:a, b=:b"` over the fields of `T`, limited to `allowed` unless it is
/// empty.
pub fn set<T: SqlFields>(allowed: &[&str]) -> String {
    let mut map = set_map::<T>();
    if !allowed.is_empty() {
        map.retain(|column, _| allowed.contains(&column.as_str()));
    }
    set_implode(", ", &map)
}

/// Join `key=value` pairs with `separator`.
pub fn set_implode(separator: &str, map: &BTreeMap<String, String>) -> String {
    map.iter()
        .map(|(column, placeholder)| format!("{column}={placeholder}"))
        .collect::<Vec<_>>()
        .join(separator)
}
