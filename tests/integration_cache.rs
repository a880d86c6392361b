//! Integration tests for the cache manager.
//!
//! These tests exercise the public API end to end:
//! - Similarity bounds, symmetry and the reference color scenarios
//! - Exact and fuzzy lookups, invalidation and expiry
//! - Fingerprint stability

use image::{DynamicImage, ImageBuffer, Rgb};
use recognition_cache::core::hasher::HasherConfig;
use recognition_cache::core::manager::{CacheConfig, CacheManager};
use recognition_cache::core::metadata::ImageMetadata;
use recognition_cache::core::recognition::{RecognitionResult, RecognitionStrategy, RecognizedItem};
use recognition_cache::core::similarity::{MatcherConfig, SimilarityMatcher};
use recognition_cache::events::{Event, EventChannel, LookupEvent};

fn solid(width: u32, height: u32, rgb: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb(rgb)))
}

/// Smooth diagonal gradient with some structure
fn scene(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| {
        let r = (x * 200 / width) as u8;
        let g = (y * 180 / height) as u8;
        let b = if (x / 16 + y / 16) % 2 == 0 { 40 } else { 160 };
        Rgb([r, g, b])
    }))
}

/// The same scene with small deterministic noise
fn noisy(image: &DynamicImage) -> DynamicImage {
    let mut pixels = image.to_rgb8();
    for (x, y, pixel) in pixels.enumerate_pixels_mut() {
        let delta = ((x * 7 + y * 13) % 5) as i16 - 2;
        for channel in pixel.0.iter_mut() {
            *channel = (*channel as i16 + delta).clamp(0, 255) as u8;
        }
    }
    DynamicImage::ImageRgb8(pixels)
}

fn recognized(name: &str, confidence: f64) -> RecognitionResult {
    RecognitionResult::new(RecognizedItem::new(name, confidence), ImageMetadata::default())
        .with_strategies(vec![RecognitionStrategy::Classification])
}

fn cache() -> CacheManager {
    CacheManager::builder().build().unwrap()
}

#[test]
fn identical_solid_red_is_highly_similar() {
    let matcher = SimilarityMatcher::default();
    let score = matcher
        .similarity(&solid(100, 100, [255, 0, 0]), &solid(100, 100, [255, 0, 0]))
        .unwrap();
    assert!(score > 0.9);
}

#[test]
fn red_and_blue_are_not_similar() {
    let matcher = SimilarityMatcher::default();
    let score = matcher
        .similarity(&solid(100, 100, [255, 0, 0]), &solid(100, 100, [0, 0, 255]))
        .unwrap();
    assert!(score < 0.7, "red vs blue scored {}", score);
}

#[test]
fn resized_green_is_similar() {
    let matcher = SimilarityMatcher::default();
    let score = matcher
        .similarity(&solid(100, 100, [0, 255, 0]), &solid(102, 98, [0, 255, 0]))
        .unwrap();
    assert!(score > 0.8, "green vs resized green scored {}", score);
}

#[test]
fn similarity_is_bounded_and_symmetric() {
    let matcher = SimilarityMatcher::default();
    let images = [
        scene(64, 48),
        noisy(&scene(64, 48)),
        scene(90, 90),
        solid(30, 30, [12, 200, 99]),
        solid(64, 48, [0, 0, 0]),
    ];

    for a in &images {
        assert_eq!(matcher.similarity(a, a).unwrap(), 1.0);
        for b in &images {
            let ab = matcher.similarity(a, b).unwrap();
            let ba = matcher.similarity(b, a).unwrap();
            assert!((0.0..=1.0).contains(&ab));
            assert_eq!(ab, ba);
        }
    }
}

#[test]
fn noisy_copy_scores_above_threshold() {
    let matcher = SimilarityMatcher::default();
    let original = scene(128, 96);
    let score = matcher.similarity(&original, &noisy(&original)).unwrap();
    assert!(score > 0.8, "noisy copy scored {}", score);
}

#[test]
fn perceptual_hash_is_deterministic_and_well_formed() {
    let hasher = HasherConfig::new().build();
    let image = scene(120, 80);

    let first = hasher.perceptual_hash(&image);
    let second = hasher.perceptual_hash(&image);
    let bits = first.to_bit_string();

    assert_eq!(first, second);
    assert_eq!(first.len(), 63);
    assert_eq!(bits.len(), 63);
    assert!(bits.chars().all(|c| c == '0' || c == '1'));
}

#[test]
fn perceptual_hash_tolerates_noise() {
    let hasher = HasherConfig::new().build();
    let original = scene(128, 96);

    let distance = hasher
        .hash_distance(
            &hasher.perceptual_hash(&original),
            &hasher.perceptual_hash(&noisy(&original)),
        )
        .unwrap();
    assert!(distance <= 0.15, "noise moved the hash by {}", distance);
}

#[test]
fn round_trip_returns_the_stored_result() {
    let cache = cache();
    let image = scene(80, 60);

    assert!(cache.cache_result(&image, recognized("Quilt", 0.83)));
    let hit = cache.get_cached_result(&image).unwrap().unwrap();

    assert_eq!(hit.primary_result.name, "Quilt");
    assert_eq!(hit.confidence, 0.83);
    assert_eq!(hit.similarity_score, None);
    assert_eq!(hit.strategies_used, vec![RecognitionStrategy::Classification]);
}

#[test]
fn near_duplicate_is_served_with_a_score() {
    let cache = cache();
    let original = scene(128, 96);
    cache.cache_result(&original, recognized("Quilt", 0.9));

    let hit = cache.get_cached_result(&noisy(&original)).unwrap().unwrap();

    assert_eq!(hit.primary_result.name, "Quilt");
    let score = hit.similarity_score.unwrap();
    assert!((0.7..=1.0).contains(&score));
}

#[test]
fn every_field_survives_exact_and_fuzzy_hits() {
    let cache = cache();
    let original = scene(128, 96);
    let metadata = ImageMetadata {
        width: 128,
        height: 96,
        file_size_bytes: 48_213,
        format: "jpeg".to_string(),
        dominant_colors: vec!["#C83228".to_string(), "#2850A0".to_string(), "#E0E0E0".to_string()],
        brightness: 0.4217,
        contrast: 0.1843,
        has_text: true,
        estimated_object_count: 3,
    };
    let stored = RecognitionResult::new(
        RecognizedItem::new("Quilt", 0.88).with_category("textile"),
        metadata.clone(),
    )
    .with_alternatives(vec![RecognizedItem::new("Blanket", 0.41)])
    .with_strategies(vec![RecognitionStrategy::Classification, RecognitionStrategy::TextRecognition])
    .with_processing_time(1.25);
    assert!(cache.cache_result(&original, stored.clone()));

    let exact = cache.get_cached_result(&original).unwrap().unwrap();
    let fuzzy = cache.get_cached_result(&noisy(&original)).unwrap().unwrap();

    assert_eq!(exact.image_metadata, metadata);
    assert_eq!(fuzzy.image_metadata, metadata);
    assert_eq!(exact.similarity_score, None);
    assert!(fuzzy.similarity_score.is_some());
    assert!(exact.cache_expires_at.is_some());
    assert_eq!(
        RecognitionResult {
            cache_expires_at: None,
            ..exact.clone()
        },
        stored
    );
    assert_eq!(
        RecognitionResult {
            similarity_score: None,
            ..fuzzy
        },
        exact
    );
}

#[test]
fn five_distinct_colors_fill_five_entries() {
    let cache = cache();
    let colors = [
        [255, 0, 0],
        [0, 255, 0],
        [0, 0, 255],
        [255, 255, 0],
        [0, 255, 255],
    ];
    for (i, rgb) in colors.iter().enumerate() {
        assert!(cache.cache_result(&solid(50, 50, *rgb), recognized(&format!("color {}", i), 0.9)));
    }

    assert_eq!(cache.statistics().memory_entries, 5);
}

#[test]
fn strict_threshold_returns_at_most_the_duplicate() {
    let cache = cache();
    for rgb in [[255, 0, 0], [0, 0, 255], [255, 255, 0], [0, 255, 255]] {
        cache.cache_result(&solid(50, 50, rgb), recognized("color", 0.9));
    }

    let found = cache
        .find_similar_cached_results(&solid(50, 50, [255, 0, 0]), 0.95)
        .unwrap();

    assert!(found.len() <= 1);
    assert!(found.iter().all(|c| c.similarity >= 0.95));
}

#[test]
fn similar_results_are_sorted_and_above_threshold() {
    let cache = cache();
    cache.cache_result(&scene(128, 96), recognized("scene", 0.9));
    cache.cache_result(&noisy(&scene(128, 96)), recognized("noisy scene", 0.9));
    cache.cache_result(&scene(64, 64), recognized("small scene", 0.9));
    cache.cache_result(&solid(64, 64, [0, 0, 0]), recognized("black", 0.9));

    let found = cache
        .find_similar_cached_results(&scene(128, 96), 0.3)
        .unwrap();

    assert!(!found.is_empty());
    assert!(found.iter().all(|c| c.similarity >= 0.3));
    assert!(found.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    assert_eq!(found[0].entry.result.primary_result.name, "scene");
}

#[test]
fn invalidated_entry_is_gone() {
    let cache = cache();
    let image = scene(70, 70);
    cache.cache_result(&image, recognized("Quilt", 0.9));

    let key = cache.matcher().signature(&image).content_hash();
    assert!(cache.invalidate_cache(&key));

    assert!(cache.get_cached_result(&image).unwrap().is_none());
}

#[test]
fn expired_entries_are_never_served() {
    let config = CacheConfig {
        ttl_seconds: 0,
        ..CacheConfig::default()
    };
    let cache = CacheManager::builder().config(config).build().unwrap();
    let image = scene(70, 70);
    cache.cache_result(&image, recognized("Quilt", 0.9));

    assert!(cache.get_cached_result(&image).unwrap().is_none());
    assert!(cache.get_cached_result(&noisy(&image)).unwrap().is_none());

    assert_eq!(cache.cleanup_expired_cache(), 1);
    assert!(cache.get_cached_result(&image).unwrap().is_none());
    assert_eq!(cache.cleanup_expired_cache(), 0);
}

#[test]
fn lookups_report_their_outcome() {
    let (sender, receiver) = EventChannel::new();
    let cache = CacheManager::builder().events(sender).build().unwrap();
    let image = scene(60, 60);
    cache.cache_result(&image, recognized("Quilt", 0.9));

    cache.get_cached_result(&image).unwrap();
    cache.get_cached_result(&solid(60, 60, [0, 0, 0])).unwrap();

    let outcomes: Vec<LookupEvent> = receiver
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            Event::Lookup(outcome) => Some(outcome),
            _ => None,
        })
        .collect();

    assert_eq!(outcomes.len(), 2);
    assert!(matches!(outcomes[0], LookupEvent::ExactHit { .. }));
    assert!(matches!(outcomes[1], LookupEvent::Miss { .. }));
}

#[test]
fn bucketed_index_still_finds_near_duplicates() {
    let mut config = CacheConfig::default();
    config.index.min_entries_for_buckets = 4;
    let cache = CacheManager::builder().config(config).build().unwrap();

    for size in [40u32, 56, 72, 88, 104] {
        cache.cache_result(&scene(size, size), recognized(&format!("scene {}", size), 0.9));
    }
    let target = scene(128, 96);
    cache.cache_result(&target, recognized("target", 0.9));

    let outcome = cache.optimize_similarity_index();
    assert!(outcome.bucketed);
    assert_eq!(outcome.entries, 6);

    let hit = cache.get_cached_result(&noisy(&target)).unwrap().unwrap();
    assert!(hit.similarity_score.is_some());
}

#[test]
fn configured_grid_size_changes_hash_length() {
    let config = CacheConfig {
        matcher: MatcherConfig {
            grid_size: 16,
            ..MatcherConfig::default()
        },
        ..CacheConfig::default()
    };
    let cache = CacheManager::builder().config(config).build().unwrap();

    let signature = cache.matcher().signature(&scene(64, 64));
    assert_eq!(signature.perceptual_hash().len(), 255);
}
