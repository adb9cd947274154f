//! Memory store: validated, transactional access to the four collections
//!
//! Every write validates first and then runs in one transaction together with
//! its tag and context rows.

use std::sync::Arc;

use tracing::debug;

use super::connection::Storage;
use super::queries;
use super::validation::{
    validate_create, validate_limit, validate_owner, validate_relationship, validate_update,
};
use crate::error::{LtmError, Result};
use crate::intelligence::classifier::Classifier;
use crate::types::*;
use crate::vocabulary::TagVocabulary;

#[derive(Clone)]
pub struct MemoryStore {
    storage: Storage,
    vocabulary: Arc<TagVocabulary>,
    classifier: Arc<Classifier>,
}

impl MemoryStore {
    pub fn new(storage: Storage, vocabulary: TagVocabulary, classifier: Classifier) -> Self {
        Self {
            storage,
            vocabulary: Arc::new(vocabulary),
            classifier: Arc::new(classifier),
        }
    }

    /// In-memory store with the default vocabulary and phrase lists
    pub fn open_in_memory() -> Result<Self> {
        let classifier = Classifier::new(&crate::config::LearningConfig::default())?;
        Ok(Self::new(
            Storage::open_in_memory()?,
            TagVocabulary::default(),
            classifier,
        ))
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn vocabulary(&self) -> &TagVocabulary {
        &self.vocabulary
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Validate a create request and fill in classified defaults.
    ///
    /// The returned input is ready for `queries::create_memory`, which lets
    /// batch passes insert inside their own transaction.
    pub fn prepare_create(&self, input: &CreateMemoryInput) -> Result<CreateMemoryInput> {
        let tags = validate_create(input, &self.vocabulary)?;

        let mut prepared = input.clone();
        prepared.owner_id = input.owner_id.trim().to_string();
        prepared.tags = tags;
        if prepared.memory_type.is_none() {
            prepared.memory_type = Some(self.classifier.classify_type(&input.content));
        }
        prepared.category = Some(match input.category {
            Some(ref category) => category.trim().to_string(),
            None => self.classifier.classify_category(&input.content),
        });
        Ok(prepared)
    }

    pub fn create(&self, input: &CreateMemoryInput) -> Result<Memory> {
        let prepared = self.prepare_create(input)?;
        let memory = self
            .storage
            .with_transaction(|conn| queries::create_memory(conn, &prepared))?;
        debug!(
            memory_id = memory.id,
            owner_id = %memory.owner_id,
            memory_type = %memory.memory_type,
            "memory created"
        );
        Ok(memory)
    }

    /// Read a memory without touching its access statistics
    pub fn get(&self, id: MemoryId) -> Result<Memory> {
        self.storage.with_read_connection(|conn| queries::get_memory(conn, id))
    }

    pub fn update(&self, id: MemoryId, input: &UpdateMemoryInput) -> Result<Memory> {
        let tags = validate_update(input, &self.vocabulary)?;
        let mut input = input.clone();
        if tags.is_some() {
            input.tags = tags;
        }
        if let Some(ref category) = input.category {
            input.category = Some(category.trim().to_string());
        }
        self.storage
            .with_transaction(|conn| queries::update_memory(conn, id, &input))
    }

    pub fn delete(&self, id: MemoryId) -> Result<()> {
        self.storage
            .with_transaction(|conn| queries::delete_memory(conn, id))?;
        debug!(memory_id = id, "memory deleted");
        Ok(())
    }

    /// Delete on behalf of an owner; another owner's memory reads as missing
    pub fn delete_owned(&self, owner_id: &str, id: MemoryId) -> Result<()> {
        validate_owner(owner_id)?;
        self.storage.with_transaction(|conn| {
            let memory = queries::get_memory(conn, id)?;
            if memory.owner_id != owner_id {
                return Err(LtmError::NotFound(id));
            }
            queries::delete_memory(conn, id)
        })
    }

    pub fn list(&self, owner_id: &str, options: &ListOptions) -> Result<Vec<Memory>> {
        validate_owner(owner_id)?;
        if let Some(limit) = options.limit {
            validate_limit(limit)?;
        }
        self.storage
            .with_read_connection(|conn| queries::list_memories(conn, owner_id, options))
    }

    pub fn search(&self, owner_id: &str, query: &str, filters: &SearchFilters) -> Result<Vec<Memory>> {
        validate_owner(owner_id)?;
        if let Some(limit) = filters.limit {
            validate_limit(limit)?;
        }
        self.storage
            .with_read_connection(|conn| queries::search_memories(conn, owner_id, query, filters))
    }

    pub fn record_access(&self, id: MemoryId, record: &AccessRecord) -> Result<()> {
        self.storage
            .with_transaction(|conn| queries::record_access(conn, id, record))
    }

    pub fn access_history(&self, id: MemoryId, limit: i64) -> Result<Vec<AccessLog>> {
        validate_limit(limit)?;
        self.storage
            .with_read_connection(|conn| queries::access_history(conn, id, limit))
    }

    pub fn add_context(&self, memory_id: MemoryId, context: &NewContext) -> Result<MemoryContext> {
        if context.key.trim().is_empty() {
            return Err(LtmError::Validation("context key must not be empty".into()));
        }
        super::validation::validate_unit("context confidence", context.confidence)?;
        self.storage.with_transaction(|conn| {
            queries::get_memory(conn, memory_id)?;
            queries::add_context(conn, memory_id, context)
        })
    }

    pub fn get_contexts(&self, memory_id: MemoryId) -> Result<Vec<MemoryContext>> {
        self.storage
            .with_read_connection(|conn| queries::get_contexts(conn, memory_id))
    }

    pub fn add_relationship(&self, input: &CreateRelationshipInput) -> Result<Relationship> {
        validate_relationship(input)?;
        self.storage
            .with_transaction(|conn| queries::create_relationship(conn, input))
    }

    /// Edges with the memory at either end
    pub fn get_relationships(&self, memory_id: MemoryId) -> Result<Vec<Relationship>> {
        self.storage
            .with_read_connection(|conn| queries::get_relationships(conn, memory_id))
    }

    pub fn stats(&self, owner_id: &str) -> Result<MemoryStats> {
        validate_owner(owner_id)?;
        self.storage
            .with_read_connection(|conn| queries::get_stats(conn, owner_id))
    }

    /// Active memory with the same owner, type, category and exact content
    pub fn find_active_duplicate(
        &self,
        owner_id: &str,
        memory_type: MemoryType,
        category: &str,
        content: &str,
    ) -> Result<Option<MemoryId>> {
        self.storage.with_read_connection(|conn| {
            queries::find_active_duplicate(conn, owner_id, memory_type, category, content)
        })
    }

    pub fn count(&self, owner_id: &str) -> Result<i64> {
        self.storage
            .with_read_connection(|conn| queries::count_memories(conn, owner_id))
    }

    pub fn list_owners(&self) -> Result<Vec<String>> {
        self.storage.with_read_connection(queries::list_owners)
    }
}
