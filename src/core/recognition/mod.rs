//! # Recognition Module
//!
//! The shape of a recognition result as produced by the external recognition
//! service and kept by the cache. The cache never creates these itself; it
//! stores what it is given and hands it back, tagged with how it was found.

use crate::core::metadata::ImageMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a recognition result was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionStrategy {
    /// Whole-image classification
    Classification,
    /// Object detection and localisation
    ObjectDetection,
    /// Text recognition (OCR)
    TextRecognition,
    /// Barcode or QR code decoding
    BarcodeDetection,
    /// Color and appearance analysis
    ColorAnalysis,
    /// Entered or corrected by a person
    Manual,
}

impl std::fmt::Display for RecognitionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecognitionStrategy::Classification => write!(f, "classification"),
            RecognitionStrategy::ObjectDetection => write!(f, "object detection"),
            RecognitionStrategy::TextRecognition => write!(f, "text recognition"),
            RecognitionStrategy::BarcodeDetection => write!(f, "barcode detection"),
            RecognitionStrategy::ColorAnalysis => write!(f, "color analysis"),
            RecognitionStrategy::Manual => write!(f, "manual"),
        }
    }
}

/// One thing the recognizer believes is in the image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedItem {
    pub id: Uuid,
    pub name: String,
    pub category: Option<String>,
    /// Confidence for this item alone, in [0, 1]
    pub confidence: f64,
}

impl RecognizedItem {
    pub fn new(name: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            category: None,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// A complete recognition outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub primary_result: RecognizedItem,
    pub alternative_results: Vec<RecognizedItem>,
    /// Overall confidence, in [0, 1]
    pub confidence: f64,
    pub strategies_used: Vec<RecognitionStrategy>,
    pub processing_time_seconds: f64,
    pub image_metadata: ImageMetadata,
    /// Set only when served by fuzzy lookup; `None` means an exact match or
    /// a live result
    pub similarity_score: Option<f64>,
    /// When the cached copy of this result stops being served
    pub cache_expires_at: Option<DateTime<Utc>>,
}

impl RecognitionResult {
    /// A fresh result as returned by the recognition service
    pub fn new(primary_result: RecognizedItem, image_metadata: ImageMetadata) -> Self {
        let confidence = primary_result.confidence;
        Self {
            primary_result,
            alternative_results: Vec::new(),
            confidence,
            strategies_used: Vec::new(),
            processing_time_seconds: 0.0,
            image_metadata,
            similarity_score: None,
            cache_expires_at: None,
        }
    }

    pub fn with_alternatives(mut self, alternatives: Vec<RecognizedItem>) -> Self {
        self.alternative_results = alternatives;
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<RecognitionStrategy>) -> Self {
        self.strategies_used = strategies;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_processing_time(mut self, seconds: f64) -> Self {
        self.processing_time_seconds = seconds.max(0.0);
        self
    }

    /// True when the result came from a near-duplicate rather than an exact match
    pub fn is_fuzzy_match(&self) -> bool {
        self.similarity_score.is_some()
    }
}
