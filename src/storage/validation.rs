//! Input validation, run before any write
//!
//! A rejected input never reaches the database, so a failed create or update
//! leaves no partial record behind.

use crate::error::{LtmError, Result};
use crate::types::{CreateMemoryInput, CreateRelationshipInput, UpdateMemoryInput};
use crate::vocabulary::TagVocabulary;

pub const MIN_IMPORTANCE: i32 = 1;
pub const MAX_IMPORTANCE: i32 = 10;

pub fn validate_owner(owner_id: &str) -> Result<()> {
    if owner_id.trim().is_empty() {
        return Err(LtmError::Validation("owner_id must not be empty".to_string()));
    }
    Ok(())
}

pub fn validate_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(LtmError::Validation("content must not be empty".to_string()));
    }
    Ok(())
}

pub fn validate_importance(importance: i32) -> Result<()> {
    if !(MIN_IMPORTANCE..=MAX_IMPORTANCE).contains(&importance) {
        return Err(LtmError::Validation(format!(
            "importance_score must be within [{}, {}], got {}",
            MIN_IMPORTANCE, MAX_IMPORTANCE, importance
        )));
    }
    Ok(())
}

/// Unit-interval check shared by confidence and strength
pub fn validate_unit(name: &str, value: f32) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(LtmError::Validation(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

pub fn validate_limit(limit: i64) -> Result<()> {
    if limit < 0 {
        return Err(LtmError::Validation(format!(
            "limit must not be negative, got {}",
            limit
        )));
    }
    Ok(())
}

fn validate_category(category: &str) -> Result<()> {
    if category.trim().is_empty() {
        return Err(LtmError::Validation("category must not be empty".to_string()));
    }
    Ok(())
}

/// Check a create request; returns the normalized tag set
pub fn validate_create(input: &CreateMemoryInput, vocabulary: &TagVocabulary) -> Result<Vec<String>> {
    validate_owner(&input.owner_id)?;
    validate_content(&input.content)?;
    let tags = vocabulary.validate(&input.tags)?;
    validate_importance(input.importance_score)?;
    validate_unit("confidence_score", input.confidence_score)?;
    if let Some(ref category) = input.category {
        validate_category(category)?;
    }
    for context in &input.contexts {
        if context.key.trim().is_empty() {
            return Err(LtmError::Validation("context key must not be empty".to_string()));
        }
        validate_unit("context confidence", context.confidence)?;
    }
    Ok(tags)
}

/// Check an update request; returns the normalized tag set when tags change
pub fn validate_update(
    input: &UpdateMemoryInput,
    vocabulary: &TagVocabulary,
) -> Result<Option<Vec<String>>> {
    if let Some(ref content) = input.content {
        validate_content(content)?;
    }
    let tags = match input.tags {
        Some(ref tags) => Some(vocabulary.validate(tags)?),
        None => None,
    };
    if let Some(importance) = input.importance_score {
        validate_importance(importance)?;
    }
    if let Some(confidence) = input.confidence_score {
        validate_unit("confidence_score", confidence)?;
    }
    if let Some(ref category) = input.category {
        validate_category(category)?;
    }
    Ok(tags)
}

pub fn validate_relationship(input: &CreateRelationshipInput) -> Result<()> {
    if input.source_memory_id == input.target_memory_id {
        return Err(LtmError::Validation(
            "a memory cannot relate to itself".to_string(),
        ));
    }
    validate_unit("strength", input.strength)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> TagVocabulary {
        TagVocabulary::default()
    }

    #[test]
    fn test_valid_create_returns_normalized_tags() {
        let input = CreateMemoryInput::new("u1", "Prefers dark mode", &["Preference", "tool"], 5);
        let tags = validate_create(&input, &vocab()).unwrap();
        assert_eq!(tags, vec!["preference", "tool"]);
    }

    #[test]
    fn test_rejects_bad_create_inputs() {
        let cases = vec![
            CreateMemoryInput::new("u1", "   ", &["work"], 5),
            CreateMemoryInput::new("u1", "x", &[], 5),
            CreateMemoryInput::new("u1", "x", &["nonsense"], 5),
            CreateMemoryInput::new("u1", "x", &["work"], 0),
            CreateMemoryInput::new("u1", "x", &["work"], 11),
            CreateMemoryInput::new("", "x", &["work"], 5),
            CreateMemoryInput {
                confidence_score: 1.5,
                ..CreateMemoryInput::new("u1", "x", &["work"], 5)
            },
            CreateMemoryInput {
                confidence_score: f32::NAN,
                ..CreateMemoryInput::new("u1", "x", &["work"], 5)
            },
        ];
        for input in cases {
            let err = validate_create(&input, &vocab()).unwrap_err();
            assert!(err.is_validation(), "{:?}", input);
        }
    }

    #[test]
    fn test_update_checks_only_present_fields() {
        assert_eq!(validate_update(&UpdateMemoryInput::default(), &vocab()).unwrap(), None);
        let bad = UpdateMemoryInput {
            importance_score: Some(12),
            ..Default::default()
        };
        assert!(validate_update(&bad, &vocab()).is_err());
    }

    #[test]
    fn test_relationship_rules() {
        let mut input = CreateRelationshipInput {
            source_memory_id: 1,
            target_memory_id: 1,
            relationship_type: Default::default(),
            strength: 0.5,
            description: None,
        };
        assert!(validate_relationship(&input).is_err());
        input.target_memory_id = 2;
        assert!(validate_relationship(&input).is_ok());
        input.strength = -0.1;
        assert!(validate_relationship(&input).is_err());
    }

    #[test]
    fn test_negative_limit() {
        assert!(validate_limit(-1).is_err());
        assert!(validate_limit(0).is_ok());
    }
}
