//! The directory store
//!
//! Persisted state lives in a hierarchical, directory-style store. Entries
//! are addressed by a distinguished name (DN), carry an object class, and
//! hold a flat map of JSON attributes. The [`Store`] trait is the raw,
//! object-safe surface a backend provides; [`StoreExt`] layers typed access
//! on top of it for any [`Entry`].

use std::fmt;

use aliri_braid::braid;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::StoreError;

mod memory;

pub use memory::MemoryStore;

/// A distinguished name, such as `inum=1234,ou=clients,o=warden`
#[braid(serde, ref_doc = "A borrowed reference to a distinguished name ([`Dn`])")]
pub struct Dn;

impl DnRef {
    /// The DN of a child entry, named by the given attribute and value
    pub fn child(&self, attribute: &str, value: &str) -> Dn {
        Dn::new(format!("{}={},{}", attribute, value, self.as_str()))
    }

    /// The DN of the parent entry, if any
    #[must_use]
    pub fn parent(&self) -> Option<&DnRef> {
        self.as_str()
            .split_once(',')
            .map(|(_, parent)| DnRef::from_str(parent))
    }

    /// Whether this DN names `base` itself or an entry below it
    #[must_use]
    pub fn is_within(&self, base: &DnRef) -> bool {
        let this = self.as_str();
        let base = base.as_str();
        this == base
            || (this.len() > base.len()
                && this.ends_with(base)
                && this.as_bytes()[this.len() - base.len() - 1] == b',')
    }
}

/// The attributes of a stored entry
pub type Attributes = serde_json::Map<String, Value>;

/// A typed entry that can be kept in the store
pub trait Entry: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The object class entries of this type are stored under
    const OBJECT_CLASS: &'static str;

    /// Where the entry lives
    fn dn(&self) -> &DnRef;
}

/// How far below the base DN a search reaches
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Only the base entry itself
    Base,
    /// Only direct children of the base entry
    One,
    /// The base entry and everything below it
    Sub,
}

impl Scope {
    /// Whether `dn` falls within this scope of `base`
    #[must_use]
    pub fn contains(self, base: &DnRef, dn: &DnRef) -> bool {
        match self {
            Self::Base => dn == base,
            Self::One => dn.parent() == Some(base),
            Self::Sub => dn.is_within(base),
        }
    }
}

/// A search filter over entry attributes
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// Matches every entry
    Always,
    /// The attribute is present and not null
    Present(String),
    /// The attribute equals the value
    Equals(String, Value),
    /// The attribute is a number at or before the given value
    AtOrBefore(String, u64),
    /// The attribute is a number strictly before the given value
    Before(String, u64),
    /// All filters match
    And(Vec<Filter>),
    /// Any filter matches
    Or(Vec<Filter>),
    /// The filter does not match
    Not(Box<Filter>),
}

impl Filter {
    /// The attribute is present
    pub fn present(attribute: impl Into<String>) -> Self {
        Self::Present(attribute.into())
    }

    /// The attribute equals the value
    pub fn equals(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals(attribute.into(), value.into())
    }

    /// The attribute is at or before the value
    pub fn at_or_before(attribute: impl Into<String>, value: u64) -> Self {
        Self::AtOrBefore(attribute.into(), value)
    }

    /// The attribute is strictly before the value
    pub fn before(attribute: impl Into<String>, value: u64) -> Self {
        Self::Before(attribute.into(), value)
    }

    /// Negates the filter
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Whether the attributes satisfy the filter
    #[must_use]
    pub fn matches(&self, attributes: &Attributes) -> bool {
        match self {
            Self::Always => true,
            Self::Present(attr) => attributes.get(attr).map_or(false, |v| !v.is_null()),
            Self::Equals(attr, value) => attributes.get(attr) == Some(value),
            Self::AtOrBefore(attr, bound) => attributes
                .get(attr)
                .and_then(Value::as_u64)
                .map_or(false, |v| v <= *bound),
            Self::Before(attr, bound) => attributes
                .get(attr)
                .and_then(Value::as_u64)
                .map_or(false, |v| v < *bound),
            Self::And(filters) => filters.iter().all(|f| f.matches(attributes)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(attributes)),
            Self::Not(filter) => !filter.matches(attributes),
        }
    }
}

/// A search over entries of one object class
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    /// Where the search starts
    pub base: Dn,
    /// The object class of matching entries
    pub object_class: &'static str,
    /// The filter entries must satisfy
    pub filter: Filter,
    /// How far below the base the search reaches
    pub scope: Scope,
}

impl Query {
    /// A subtree search for entries of type `T`
    pub fn subtree<T: Entry>(base: Dn, filter: Filter) -> Self {
        Self {
            base,
            object_class: T::OBJECT_CLASS,
            filter,
            scope: Scope::Sub,
        }
    }

    /// Whether an entry satisfies the query
    #[must_use]
    pub fn matches(&self, dn: &DnRef, object_class: &str, attributes: &Attributes) -> bool {
        object_class == self.object_class
            && self.scope.contains(&self.base, dn)
            && self.filter.matches(attributes)
    }
}

/// An opaque continuation point in a paged search
#[braid(serde, ref_doc = "A borrowed reference to a search [`Cursor`]")]
pub struct Cursor;

/// Which page of a search to return
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
    /// Where the previous page ended, or `None` for the first page
    pub cursor: Option<Cursor>,
    /// The maximum number of entries to return
    pub size: usize,
}

impl PageRequest {
    /// The first page of the given size
    #[must_use]
    pub fn first(size: usize) -> Self {
        Self { cursor: None, size }
    }
}

/// A page of search results
#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    /// The entries on this page
    pub entries: Vec<T>,
    /// Where to continue, present only when more matching entries remain
    pub next: Option<Cursor>,
}

/// An expectation checked by a conditional write
#[derive(Clone, Debug, PartialEq)]
pub struct Expect {
    /// The attribute to check
    pub attribute: &'static str,
    /// The value the attribute must currently hold
    pub value: Value,
}

/// A directory store backend
#[async_trait]
pub trait Store: fmt::Debug + Send + Sync {
    /// Reads an entry, optionally projecting only the named attributes
    async fn find_raw(
        &self,
        object_class: &str,
        dn: &DnRef,
        attributes: Option<&[&str]>,
    ) -> Result<Option<Attributes>, StoreError>;

    /// Returns one page of entries matching the query, ordered by DN
    async fn search_raw(
        &self,
        query: &Query,
        page: PageRequest,
    ) -> Result<Page<Attributes>, StoreError>;

    /// Inserts a new entry
    async fn persist_raw(
        &self,
        object_class: &str,
        dn: &DnRef,
        attributes: Attributes,
    ) -> Result<(), StoreError>;

    /// Replaces the given attributes of an existing entry
    async fn merge_raw(
        &self,
        object_class: &str,
        dn: &DnRef,
        attributes: Attributes,
    ) -> Result<(), StoreError>;

    /// Replaces the given attributes of an existing entry, but only if the
    /// expectation still holds
    async fn merge_raw_if(
        &self,
        object_class: &str,
        dn: &DnRef,
        attributes: Attributes,
        expect: &Expect,
    ) -> Result<(), StoreError>;

    /// Removes an entry
    async fn remove(&self, dn: &DnRef) -> Result<(), StoreError>;

    /// Whether an entry of the object class exists at the DN
    async fn contains(&self, object_class: &str, dn: &DnRef) -> Result<bool, StoreError>;
}

/// Typed access to a [`Store`]
#[async_trait]
pub trait StoreExt: Store {
    /// Reads an entry
    async fn find<T: Entry>(&self, dn: &DnRef) -> Result<Option<T>, StoreError> {
        match self.find_raw(T::OBJECT_CLASS, dn, None).await? {
            Some(attributes) => Ok(Some(serde_json::from_value(Value::Object(attributes))?)),
            None => Ok(None),
        }
    }

    /// Reads only the named attributes of an entry of type `T` into `P`
    async fn find_projected<T, P>(
        &self,
        dn: &DnRef,
        attributes: &[&str],
    ) -> Result<Option<P>, StoreError>
    where
        T: Entry,
        P: DeserializeOwned + Send + 'static,
    {
        match self.find_raw(T::OBJECT_CLASS, dn, Some(attributes)).await? {
            Some(attributes) => Ok(Some(serde_json::from_value(Value::Object(attributes))?)),
            None => Ok(None),
        }
    }

    /// Returns one page of typed entries
    ///
    /// Entries that cannot be mapped to `T` are skipped with a warning.
    async fn search<T: Entry>(
        &self,
        query: &Query,
        page: PageRequest,
    ) -> Result<Page<T>, StoreError> {
        let raw = self.search_raw(query, page).await?;
        let entries = raw
            .entries
            .into_iter()
            .filter_map(|attributes| {
                let dn = attributes.get("dn").and_then(Value::as_str).map(ToOwned::to_owned);
                match serde_json::from_value(Value::Object(attributes)) {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        let error: &dyn std::error::Error = &err;
                        tracing::warn!(store.dn = ?dn, error, "skipping unmappable entry");
                        None
                    }
                }
            })
            .collect();

        Ok(Page {
            entries,
            next: raw.next,
        })
    }

    /// Inserts a new entry
    async fn persist<T: Entry>(&self, entry: &T) -> Result<(), StoreError> {
        let attributes = to_attributes(entry)?;
        self.persist_raw(T::OBJECT_CLASS, entry.dn(), attributes)
            .await
    }

    /// Replaces an existing entry's attributes
    async fn merge<T: Entry>(&self, entry: &T) -> Result<(), StoreError> {
        let attributes = to_attributes(entry)?;
        self.merge_raw(T::OBJECT_CLASS, entry.dn(), attributes).await
    }

    /// Replaces an existing entry's attributes if the expectation holds
    async fn merge_if<T: Entry>(&self, entry: &T, expect: &Expect) -> Result<(), StoreError> {
        let attributes = to_attributes(entry)?;
        self.merge_raw_if(T::OBJECT_CLASS, entry.dn(), attributes, expect)
            .await
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

fn to_attributes<T: Serialize>(entry: &T) -> Result<Attributes, StoreError> {
    match serde_json::to_value(entry)? {
        Value::Object(attributes) => Ok(attributes),
        _ => Err(StoreError::Mapping(serde::ser::Error::custom(
            "entry did not serialize to an object",
        ))),
    }
}
