use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{info, warn};

use super::schema::{validate_descriptor, SchemaViolation};
use super::types::{DescriptorFile, ModelDescriptor, ModelLayout, FORMATTER_ENTRY_POINT};

/// Ways a model version on disk can fail validation.
#[derive(Debug)]
pub enum DescriptorError {
    /// The `<name>/<version>` directory does not exist
    ModelNotFound { key: String },
    /// `<name>.json` is missing from the version directory
    DescriptorNotFound { key: String, file: String },
    /// The descriptor is not valid JSON
    InvalidJson(String),
    /// The descriptor does not conform to the schema
    Schema(SchemaViolation),
    /// The descriptor name differs from the directory name
    NameConflict { directory: String, declared: String },
    /// The descriptor version differs from the directory version
    VersionConflict { name: String, directory: String, declared: u32 },
    /// The backend artifact is missing
    ArtifactNotFound { key: String, file: String, backend: String },
    /// The declared script folder is missing
    ScriptFolderNotFound { key: String, folder: String },
    /// The script folder has no formatter entry point
    ScriptNotFound { key: String },
    /// Any other file-system failure
    Io(io::Error),
}

impl DescriptorError {
    /// Whether the offending version directory should be removed.
    ///
    /// Everything except plain I/O faults and an already-absent directory
    /// leaves a half-valid model behind.
    pub fn triggers_cleanup(&self) -> bool {
        !matches!(self, DescriptorError::Io(_) | DescriptorError::ModelNotFound { .. })
    }
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DescriptorError::ModelNotFound { key } => write!(f, "Model '{}' not found", key),
            DescriptorError::DescriptorNotFound { key, file } => {
                write!(f, "'{}' for model '{}' not found", file, key)
            }
            DescriptorError::InvalidJson(msg) => {
                write!(f, "JSON is invalid. Please, validate your JSON file: {}", msg)
            }
            DescriptorError::Schema(violation) => write!(f, "{}", violation),
            DescriptorError::NameConflict { directory, declared } => write!(
                f,
                "Model name '{}' is different than model name '{}' on JSON file",
                directory, declared
            ),
            DescriptorError::VersionConflict { name, directory, declared } => write!(
                f,
                "Model folder version '{}' for model '{}' is different than version '{}' on JSON file",
                directory, name, declared
            ),
            DescriptorError::ArtifactNotFound { key, file, backend } => write!(
                f,
                "'{}' for model '{}' using backend '{}' not found",
                file, key, backend
            ),
            DescriptorError::ScriptFolderNotFound { key, folder } => {
                write!(f, "Folder '{}' for model '{}' not found", folder, key)
            }
            DescriptorError::ScriptNotFound { key } => {
                write!(f, "'{}' for model '{}' not found", FORMATTER_ENTRY_POINT, key)
            }
            DescriptorError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for DescriptorError {}

impl From<io::Error> for DescriptorError {
    fn from(err: io::Error) -> Self {
        DescriptorError::Io(err)
    }
}

/// Reads and schema-checks the descriptor of `<name>/<version>`.
///
/// Does not look at the artifact or script folder; see [`validate_model_files`].
pub fn load_descriptor(root: &Path, name: &str, version: &str) -> Result<ModelDescriptor, DescriptorError> {
    let key = format!("{}/{}", name, version);
    let layout = ModelLayout::new(root, name, version);

    if !layout.version_dir.is_dir() {
        return Err(DescriptorError::ModelNotFound { key });
    }

    let descriptor_path = layout.descriptor_path();
    if !descriptor_path.is_file() {
        return Err(DescriptorError::DescriptorNotFound {
            key,
            file: format!("{}.json", name),
        });
    }

    let content = fs::read_to_string(&descriptor_path)?;
    let document: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| DescriptorError::InvalidJson(e.to_string()))?;

    validate_descriptor(&document).map_err(DescriptorError::Schema)?;

    let file: DescriptorFile = serde_json::from_value(document)
        .map_err(|e| DescriptorError::InvalidJson(e.to_string()))?;

    Ok(file.model)
}

/// Validates a model version on disk.
///
/// Checks, in order: descriptor presence and schema, that the declared
/// name/version match the storage location, that the backend artifact
/// exists, and that the script folder holds the formatter entry point.
///
/// # Arguments
///
/// * `root` - Model root directory
/// * `name` - Model directory name
/// * `version` - Version directory name
///
/// # Returns
///
/// The parsed descriptor, or the first failure category encountered
pub fn validate_model_files(root: &Path, name: &str, version: &str) -> Result<ModelDescriptor, DescriptorError> {
    let key = format!("{}/{}", name, version);
    let model = load_descriptor(root, name, version)?;
    info!("'{}.json' for model '{}' is valid", name, key);

    if model.name != name {
        warn!("Descriptor name '{}' conflicts with directory '{}'", model.name, name);
        return Err(DescriptorError::NameConflict {
            directory: name.to_string(),
            declared: model.name,
        });
    }

    if model.version.to_string() != version {
        warn!("Descriptor version '{}' conflicts with directory '{}'", model.version, key);
        return Err(DescriptorError::VersionConflict {
            name: name.to_string(),
            directory: version.to_string(),
            declared: model.version,
        });
    }

    let layout = ModelLayout::new(root, name, version);
    let backend = model.backend.kind;
    if !layout.artifact_path(backend).is_file() {
        return Err(DescriptorError::ArtifactNotFound {
            key,
            file: format!("{}.{}", name, backend.artifact_extension()),
            backend: backend.to_string(),
        });
    }

    let folder = &model.script.folder;
    if !layout.script_dir(folder).is_dir() {
        return Err(DescriptorError::ScriptFolderNotFound {
            key,
            folder: folder.clone(),
        });
    }
    if !layout.formatter_path(folder).is_file() {
        return Err(DescriptorError::ScriptNotFound { key });
    }

    Ok(model)
}
