// IMPORTANT:
// Keep ALL numeric values centralized here (repo rule: no hardcoded numeric values scattered around).

// NOTE: TOOL_VERSION must stay in sync with the `version` field in Cargo.toml.
pub const TOOL_VERSION: &str = "0.1.0";

pub mod logging {
    pub const LOG_DIR_REL: &str = ".paraphrase_filter/logs";
    pub const LOG_FILE_NAME: &str = "paraphrase_filter.log";
    // Overrides LOG_DIR_REL (used by tests and sandboxed runs without a writable HOME).
    pub const LOG_DIR_ENV: &str = "PARAPHRASE_FILTER_LOG_DIR";
    pub const DEFAULT_LEVEL: &str = "info";

    pub const LOG_ROTATE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
    pub const LOG_ROTATE_KEEP_FILES: usize = 5;
}

pub mod input {
    // A single pool record per line; anything larger is almost certainly not a pool file.
    pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;
}

pub mod filter {
    // Domain-tuned cut-offs: below LOWER the candidate is not a paraphrase,
    // above UPPER it is a near-duplicate of the source.
    pub const DEFAULT_LOWER_THRESHOLD: f32 = 0.5;
    pub const DEFAULT_UPPER_THRESHOLD: f32 = 0.95;

    // Number of trailing encoder layers combined by the last-4 strategies.
    pub const LAST_LAYERS: usize = 4;
}

pub mod model {
    // Layered (all hidden states) encoder.
    pub const LAYERED_MODEL_REPO: &str = "bert-base-uncased";
    // Sentence-embedding encoder (mean pooled, L2 normalized).
    pub const SENTENCE_MODEL_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";

    pub const HUB_BASE: &str = "https://huggingface.co";
    pub const HUB_REVISION: &str = "main";

    pub const WEIGHTS_FILE: &str = "model.safetensors";
    pub const TOKENIZER_FILE: &str = "tokenizer.json";
    pub const CONFIG_FILE: &str = "config.json";

    // Local model storage directory (relative to home); one subdirectory per repo.
    pub const MODEL_DIR_REL: &str = ".paraphrase_filter/models";

    pub const DOWNLOAD_TIMEOUT_SECS: u64 = 90;

    // SHA256 pins: (repo, file, sha256). Files without a pin are logged with their hash.
    pub const PINNED_SHA256: &[(&str, &str, &str)] = &[(
        "sentence-transformers/all-MiniLM-L6-v2",
        "model.safetensors",
        "53aa51172d142c89d9012cce15ae4d6cc0ca6895895114379cacb4fab128d9db",
    )];

    // Used when config.json omits them (older BERT configs).
    pub const DEFAULT_MAX_POSITION_EMBEDDINGS: usize = 512;
    pub const DEFAULT_TYPE_VOCAB_SIZE: usize = 2;
    pub const DEFAULT_LAYER_NORM_EPS: f64 = 1e-12;

    // Clamp floors for mean pooling / L2 normalization in the sentence engine.
    pub const MASK_SUM_FLOOR: f64 = 1e-9;
    pub const NORM_FLOOR: f64 = 1e-12;
}
