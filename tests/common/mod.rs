use std::fs;
use std::path::{Path, PathBuf};

use kbsearch::Settings;
use tempfile::TempDir;

/// Crop disease records in JSONL form.
pub const DISEASE_RECORDS: &str = r#"{"id": "tomato-leaf-curl", "crop": "Tomato", "disease": "Tomato leaf curl virus", "symptoms": "Tomato plant leaves curling upward with yellow margins and stunted growth", "treatment": "Remove infected plants and control whiteflies"}
{"id": "early-blight", "crop": "Potato", "disease": "Early blight", "symptoms": "Brown concentric rings on older lower leaves", "treatment": "Apply copper fungicide and rotate crops"}
{"id": "powdery-mildew", "crop": "Squash", "disease": "Powdery mildew", "symptoms": "White powdery coating on upper leaf surfaces", "treatment": "Spray diluted milk or sulfur"}
{"id": "wheat-rust", "crop": "Wheat", "disease": "Stem rust", "symptoms": "Reddish brown pustules on stems and leaves", "treatment": "Plant resistant varieties"}
{"id": "root-rot", "crop": "Pepper", "disease": "Root rot", "symptoms": "Wilting despite wet soil and dark mushy roots", "treatment": "Improve drainage and reduce irrigation"}
{"id": "rice-blast", "crop": "Rice", "disease": "Rice blast", "symptoms": "Diamond shaped grey lesions on rice leaves", "treatment": "Balanced nitrogen and silicon fertilization"}
"#;

/// The same crop disease records as a CSV export.
pub const DISEASE_RECORDS_CSV: &str = "id,crop,disease,symptoms,treatment
tomato-leaf-curl,Tomato,Tomato leaf curl virus,Tomato plant leaves curling upward with yellow margins and stunted growth,Remove infected plants and control whiteflies
early-blight,Potato,Early blight,Brown concentric rings on older lower leaves,Apply copper fungicide and rotate crops
powdery-mildew,Squash,Powdery mildew,White powdery coating on upper leaf surfaces,Spray diluted milk or sulfur
wheat-rust,Wheat,Stem rust,Reddish brown pustules on stems and leaves,Plant resistant varieties
root-rot,Pepper,Root rot,Wilting despite wet soil and dark mushy roots,Improve drainage and reduce irrigation
rice-blast,Rice,Rice blast,Diamond shaped grey lesions on rice leaves,Balanced nitrogen and silicon fertilization
";

/// An isolated workspace whose settings use the offline hashing embedder.
pub struct TestWorkspace {
    pub dir: TempDir,
    pub settings: Settings,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut settings = Settings::default();
        settings.index_path = dir.path().join("index");
        settings.embedding.model = "hashing".to_string();
        settings.search.retry_base_delay_ms = 0;
        Self { dir, settings }
    }

    pub fn add_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    pub fn index_path(&self) -> &Path {
        &self.settings.index_path
    }
}

/// `count` distinct synthetic records, enough to exercise the inverted file.
pub fn synthetic_records(count: usize) -> String {
    const CROPS: &[&str] = &["maize", "sorghum", "cassava", "banana", "coffee", "cotton"];
    const ISSUES: &[&str] = &["aphids", "blight", "drought", "nitrogen", "mildew", "borer"];

    (0..count)
        .map(|i| {
            let crop = CROPS[i % CROPS.len()];
            let issue = ISSUES[(i / CROPS.len()) % ISSUES.len()];
            format!(
                r#"{{"id": "note-{i}", "advice": "Field note {i}: {crop} affected by {issue} in plot {i}"}}"#
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
