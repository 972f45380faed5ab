use std::{
    collections::{BTreeMap, HashSet},
    ops::Bound,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde_json::Value;

use super::{Attributes, Cursor, Dn, DnRef, Expect, Page, PageRequest, Query, Store};
use crate::error::StoreError;

#[derive(Clone, Debug)]
struct Record {
    object_class: String,
    attributes: Attributes,
}

/// A store held entirely in memory
///
/// Entries are kept ordered by DN, which is also the order searches page
/// through them. The store counts searches and can be told to fail, so that
/// sweeps and fallbacks can be observed.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Dn, Record>>,
    searches: AtomicUsize,
    unavailable: AtomicBool,
    failing_removals: Mutex<HashSet<Dn>>,
}

impl MemoryStore {
    /// Constructs an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of searches served so far
    #[must_use]
    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::Acquire)
    }

    /// The number of entries held
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Makes every operation fail as if the store could not be reached
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Makes removal of the entry at `dn` fail
    pub fn fail_removal_of(&self, dn: Dn) {
        self.failing_removals.lock().insert(dn);
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<Dn, Record>> {
        self.entries.read()
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<Dn, Record>> {
        self.entries.write()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Acquire) {
            Err(StoreError::Unavailable {
                reason: "memory store marked unavailable".to_owned(),
            })
        } else {
            Ok(())
        }
    }

    fn apply_merge(
        &self,
        object_class: &str,
        dn: &DnRef,
        attributes: Attributes,
        expect: Option<&Expect>,
    ) -> Result<(), StoreError> {
        let mut entries = self.write();
        let record = match entries.get_mut(dn) {
            Some(record) if record.object_class == object_class => record,
            _ => return Err(StoreError::NotFound(dn.to_owned())),
        };

        if let Some(expect) = expect {
            if record.attributes.get(expect.attribute) != Some(&expect.value) {
                return Err(StoreError::Conflict {
                    dn: dn.to_owned(),
                    attribute: expect.attribute.to_owned(),
                });
            }
        }

        record.attributes.extend(attributes);
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_raw(
        &self,
        object_class: &str,
        dn: &DnRef,
        attributes: Option<&[&str]>,
    ) -> Result<Option<Attributes>, StoreError> {
        self.check_available()?;

        let entries = self.read();
        let record = match entries.get(dn) {
            Some(record) if record.object_class == object_class => record,
            _ => return Ok(None),
        };

        let found = match attributes {
            Some(names) => record
                .attributes
                .iter()
                .filter(|(k, _)| names.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => record.attributes.clone(),
        };

        Ok(Some(found))
    }

    async fn search_raw(
        &self,
        query: &Query,
        page: PageRequest,
    ) -> Result<Page<Attributes>, StoreError> {
        self.check_available()?;
        self.searches.fetch_add(1, Ordering::AcqRel);

        let entries = self.read();
        let start = match &page.cursor {
            Some(cursor) => Bound::Excluded(DnRef::from_str(cursor.as_str())),
            None => Bound::Unbounded,
        };

        let mut matching = entries
            .range::<DnRef, _>((start, Bound::Unbounded))
            .filter(|(dn, record)| query.matches(dn, &record.object_class, &record.attributes));

        let mut found = Vec::with_capacity(page.size);
        let mut last = None;
        for (dn, record) in matching.by_ref().take(page.size) {
            found.push(record.attributes.clone());
            last = Some(dn);
        }

        let next = match (last, matching.next()) {
            (Some(last), Some(_)) => Some(Cursor::new(last.as_str().to_owned())),
            _ => None,
        };

        Ok(Page {
            entries: found,
            next,
        })
    }

    async fn persist_raw(
        &self,
        object_class: &str,
        dn: &DnRef,
        mut attributes: Attributes,
    ) -> Result<(), StoreError> {
        self.check_available()?;

        let mut entries = self.write();
        if entries.contains_key(dn) {
            return Err(StoreError::AlreadyExists(dn.to_owned()));
        }

        attributes.insert("dn".to_owned(), Value::String(dn.as_str().to_owned()));
        entries.insert(
            dn.to_owned(),
            Record {
                object_class: object_class.to_owned(),
                attributes,
            },
        );
        Ok(())
    }

    async fn merge_raw(
        &self,
        object_class: &str,
        dn: &DnRef,
        attributes: Attributes,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        self.apply_merge(object_class, dn, attributes, None)
    }

    async fn merge_raw_if(
        &self,
        object_class: &str,
        dn: &DnRef,
        attributes: Attributes,
        expect: &Expect,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        self.apply_merge(object_class, dn, attributes, Some(expect))
    }

    async fn remove(&self, dn: &DnRef) -> Result<(), StoreError> {
        self.check_available()?;

        let failing = self.failing_removals.lock().contains(dn);
        if failing {
            return Err(StoreError::Unavailable {
                reason: format!("removal of '{}' refused", dn),
            });
        }

        match self.write().remove(dn) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(dn.to_owned())),
        }
    }

    async fn contains(&self, object_class: &str, dn: &DnRef) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self
            .read()
            .get(dn)
            .map_or(false, |record| record.object_class == object_class))
    }
}
