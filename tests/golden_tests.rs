//! Golden tests - fixture-based tests that lock expected behavior
//!
//! These tests use JSON fixtures to verify that critical functions produce
//! expected outputs. Any change in behavior will cause these tests to fail,
//! signaling a potential breaking change.
//!
//! Run with: cargo test --test golden_tests

use serde::Deserialize;
use std::fs;

// ============================================================================
// CLASSIFICATION GOLDEN TESTS
// ============================================================================

mod classification_golden {
    use super::*;
    use ltm::config::LearningConfig;
    use ltm::intelligence::Classifier;
    use ltm::vocabulary::TagVocabulary;
    use ltm::MemoryType;

    #[derive(Debug, Deserialize)]
    struct Expected {
        memory_type: MemoryType,
        category: String,
        tags: Vec<String>,
    }

    #[derive(Debug, Deserialize)]
    struct TestCase {
        name: String,
        content: String,
        expected: Expected,
    }

    #[derive(Debug, Deserialize)]
    struct Fixture {
        test_cases: Vec<TestCase>,
    }

    #[test]
    fn test_classification_golden() {
        let fixture_path = concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/classification.json"
        );
        let content =
            fs::read_to_string(fixture_path).expect("Failed to read classification.json fixture");
        let fixture: Fixture =
            serde_json::from_str(&content).expect("Failed to parse fixture JSON");

        let classifier = Classifier::new(&LearningConfig::default()).unwrap();
        let vocabulary = TagVocabulary::default();

        for case in fixture.test_cases {
            let result = classifier.classify(&case.content, &[] as &[&str], &vocabulary);
            assert_eq!(
                result.memory_type, case.expected.memory_type,
                "Case '{}': memory type",
                case.name
            );
            assert_eq!(
                result.category, case.expected.category,
                "Case '{}': category",
                case.name
            );
            assert_eq!(result.tags, case.expected.tags, "Case '{}': tags", case.name);
        }
    }
}

// ============================================================================
// CONTEXT FORMAT GOLDEN TESTS
// ============================================================================

mod context_golden {
    use ltm::{CreateMemoryInput, LtmConfig, MemoryEngine, MemoryType};

    fn create(engine: &MemoryEngine, content: &str, tags: &[&str], memory_type: MemoryType, importance: i32) {
        let mut input = CreateMemoryInput::new("u1", content, tags, importance);
        input.memory_type = Some(memory_type);
        engine.store().create(&input).unwrap();
    }

    #[test]
    fn test_injection_block_layout() {
        let engine = MemoryEngine::open_in_memory(LtmConfig::default()).unwrap();
        create(&engine, "Uses Notion for notes", &["tool"], MemoryType::Preference, 8);
        create(&engine, "Uses Slack for team chat", &["tool"], MemoryType::Preference, 7);
        create(&engine, "Wants bullet summaries", &["communication"], MemoryType::Preference, 6);
        create(&engine, "Run a half marathon in spring", &["fitness"], MemoryType::Goal, 5);

        let memories = engine.retrieve("u1", "", Some(10)).unwrap();
        let block = engine.optimizer().format_for_injection(&memories, 800);

        assert_eq!(
            block,
            "**Tool Preferences:** Uses Notion for notes; Uses Slack for team chat\n\n\
             **Communication Style:** Wants bullet summaries\n\n\
             **Goal:** Run a half marathon in spring"
        );
    }
}
