use crate::keygen::KeyGenerator;
use crate::models::{BatchItem, ResultItem, ShortLink, Shortened};
use crate::storage::{
    LinkStore, OpContext, StorageError, StorageResult, StoreSettings, MAX_KEY_ATTEMPTS,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Key map plus the target reverse index. Always mutated under one lock.
#[derive(Debug, Default)]
pub(crate) struct LinkTable {
    links: HashMap<String, ShortLink>,
    by_target: HashMap<String, String>,
}

impl LinkTable {
    pub(crate) fn from_links(links: Vec<ShortLink>) -> Self {
        let mut table = Self::default();
        for link in links {
            table
                .by_target
                .entry(link.target.clone())
                .or_insert_with(|| link.key.clone());
            table.links.insert(link.key.clone(), link);
        }
        table
    }

    pub(crate) fn snapshot(&self) -> Vec<ShortLink> {
        self.links.values().cloned().collect()
    }

    fn fresh_key(
        &self,
        keygen: &KeyGenerator,
        reserved: &HashSet<String>,
    ) -> StorageResult<String> {
        for _ in 0..MAX_KEY_ATTEMPTS {
            let key = keygen.generate();
            if !self.links.contains_key(&key) && !reserved.contains(&key) {
                return Ok(key);
            }
        }
        Err(StorageError::KeyExhausted)
    }

    fn create(&mut self, keygen: &KeyGenerator, target: &str, owner: &str) -> StorageResult<Shortened> {
        if let Some(existing) = self.by_target.get(target) {
            return Ok(Shortened::conflict(existing.clone()));
        }

        let key = self.fresh_key(keygen, &HashSet::new())?;
        self.by_target.insert(target.to_string(), key.clone());
        self.links
            .insert(key.clone(), ShortLink::new(key.clone(), target, owner));
        Ok(Shortened::created(key))
    }

    /// Plans every insert before applying any, so a failure leaves the table as it was.
    fn batch(
        &mut self,
        keygen: &KeyGenerator,
        items: &[BatchItem],
        owner: &str,
    ) -> StorageResult<Vec<(String, String)>> {
        let mut planned: HashMap<String, String> = HashMap::new();
        let mut reserved = HashSet::new();
        let mut keys = Vec::with_capacity(items.len());

        for item in items {
            let target = item.original_url.as_str();
            let key = match self.by_target.get(target).or_else(|| planned.get(target)) {
                Some(existing) => existing.clone(),
                None => {
                    let key = self.fresh_key(keygen, &reserved)?;
                    reserved.insert(key.clone());
                    planned.insert(target.to_string(), key.clone());
                    key
                }
            };
            keys.push((item.correlation_id.clone(), key));
        }

        for (target, key) in planned {
            self.links
                .insert(key.clone(), ShortLink::new(key.clone(), target.clone(), owner));
            self.by_target.insert(target, key);
        }

        Ok(keys)
    }

    fn get(&self, key: &str) -> StorageResult<String> {
        match self.links.get(key) {
            Some(link) if link.removed => Err(StorageError::Gone),
            Some(link) => Ok(link.target.clone()),
            None => Err(StorageError::NotFound),
        }
    }

    fn find(&self, target: &str) -> StorageResult<String> {
        self.by_target
            .get(target)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    fn list_by_owner(&self, owner: &str) -> Vec<ShortLink> {
        self.links
            .values()
            .filter(|link| link.owner == owner && !link.removed)
            .cloned()
            .collect()
    }

    fn delete(&mut self, keys: &[String], owner: &str) -> usize {
        let mut removed = 0;
        for key in keys {
            if let Some(link) = self.links.get_mut(key) {
                if link.owner == owner && !link.removed {
                    link.removed = true;
                    removed += 1;
                }
            }
        }
        removed
    }

    pub(crate) fn raw(&self, key: &str) -> Option<ShortLink> {
        self.links.get(key).cloned()
    }
}

/// Process-local store guarded by a single mutex.
pub struct MemoryStore {
    settings: StoreSettings,
    keygen: KeyGenerator,
    table: Mutex<LinkTable>,
}

impl MemoryStore {
    pub fn new(settings: StoreSettings) -> Self {
        Self::with_links(settings, Vec::new())
    }

    pub fn with_links(settings: StoreSettings, links: Vec<ShortLink>) -> Self {
        Self {
            keygen: KeyGenerator::new(settings.key_length),
            settings,
            table: Mutex::new(LinkTable::from_links(links)),
        }
    }

    /// Every record including removed ones.
    pub fn snapshot(&self) -> Vec<ShortLink> {
        self.table.lock().snapshot()
    }

    /// Record for `key` regardless of its removed flag.
    pub fn get_raw(&self, key: &str) -> Option<ShortLink> {
        self.table.lock().raw(key)
    }
}

#[async_trait]
impl LinkStore for MemoryStore {
    async fn create(&self, ctx: &OpContext, target: &str, owner: &str) -> StorageResult<Shortened> {
        ctx.check()?;
        self.table.lock().create(&self.keygen, target, owner)
    }

    async fn get(&self, ctx: &OpContext, key: &str) -> StorageResult<String> {
        ctx.check()?;
        self.table.lock().get(key)
    }

    async fn find(&self, ctx: &OpContext, target: &str) -> StorageResult<String> {
        ctx.check()?;
        self.table.lock().find(target)
    }

    async fn list_by_owner(&self, ctx: &OpContext, owner: &str) -> StorageResult<Vec<ShortLink>> {
        ctx.check()?;
        let links = self.table.lock().list_by_owner(owner);
        if links.is_empty() {
            return Err(StorageError::NotFound);
        }
        Ok(links)
    }

    async fn batch(
        &self,
        ctx: &OpContext,
        items: &[BatchItem],
        owner: &str,
    ) -> StorageResult<Vec<ResultItem>> {
        ctx.check()?;
        let keys = self.table.lock().batch(&self.keygen, items, owner)?;
        Ok(keys
            .into_iter()
            .map(|(correlation_id, key)| ResultItem {
                correlation_id,
                short_url: self.short_url(&key),
            })
            .collect())
    }

    async fn delete(&self, ctx: &OpContext, keys: &[String], owner: &str) -> StorageResult<()> {
        ctx.check()?;
        let removed = self.table.lock().delete(keys, owner);
        tracing::debug!(owner, requested = keys.len(), removed, "soft-deleted links");
        Ok(())
    }

    async fn owner_of(&self, ctx: &OpContext, key: &str) -> StorageResult<Option<String>> {
        ctx.check()?;
        Ok(self.table.lock().raw(key).map(|link| link.owner))
    }

    async fn ping(&self, ctx: &OpContext) -> StorageResult<()> {
        ctx.check()
    }

    fn host(&self) -> String {
        self.settings.host()
    }
}
