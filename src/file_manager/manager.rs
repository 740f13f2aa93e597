use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::types::{CreateModelRequest, CreateOutcome, ModelDetails};
use crate::archive::{ArchiveError, ArchiveSource};
use crate::descriptor::{is_plain_segment, validate_model_files, DescriptorError, ModelDescriptor};
use crate::queue::{ModelCommand, QueueNames};
use crate::store::{ModelStore, StoreError};

static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\-\.\s]").expect("valid separator pattern"));
static UPPERCASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z]").expect("valid uppercase pattern"));

/// Normalizes a model name: separators become `_`, and every uppercase
/// letter after the first character gets an `_` in front before lowering.
///
/// `IrisModel` and `iris-model` both become `iris_model`.
pub fn snake_case(name: &str) -> String {
    let name = SEPARATORS.replace_all(name, "_");
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    let rest: String = chars.collect();
    let rest = UPPERCASE.replace_all(&rest, |caps: &regex::Captures| format!("_{}", caps[0].to_lowercase()));
    format!("{}{}", first.to_lowercase(), rest)
}

/// Errors of the file manager, each carrying its caller-facing message
#[derive(Debug)]
pub enum FileManagerError {
    /// The request body is malformed or violates the creation schema
    Validation(String),
    /// The model or version directory does not exist
    NotFound(String),
    /// The model version failed descriptor validation
    Descriptor(DescriptorError),
    /// Downloading or extracting the archive failed
    Archive(ArchiveError),
    /// A command could not be queued
    Store(StoreError),
    /// A file-system operation failed
    Io { message: String, source: io::Error },
    /// The provisioning task died before finishing
    Interrupted(String),
    /// Re-creating a model version during an update failed
    UpdateFailed(Box<FileManagerError>),
}

impl FileManagerError {
    fn io(message: &str) -> impl FnOnce(io::Error) -> FileManagerError + '_ {
        move |source| FileManagerError::Io { message: message.to_string(), source }
    }
}

impl fmt::Display for FileManagerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FileManagerError::Validation(msg) => write!(f, "{}", msg),
            FileManagerError::NotFound(msg) => write!(f, "{}", msg),
            FileManagerError::Descriptor(e) => write!(f, "{}", e),
            FileManagerError::Archive(e) => write!(f, "{}", e),
            FileManagerError::Store(e) => write!(f, "{}", e),
            FileManagerError::Io { message, .. } => write!(f, "{}", message),
            FileManagerError::Interrupted(msg) => write!(f, "Model creation was interrupted: {}", msg),
            FileManagerError::UpdateFailed(_) => write!(f, "Model update failed"),
        }
    }
}

impl Error for FileManagerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FileManagerError::Descriptor(e) => Some(e),
            FileManagerError::Archive(e) => Some(e),
            FileManagerError::Store(e) => Some(e),
            FileManagerError::Io { source, .. } => Some(source),
            FileManagerError::UpdateFailed(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<DescriptorError> for FileManagerError {
    fn from(err: DescriptorError) -> Self {
        FileManagerError::Descriptor(err)
    }
}

impl From<ArchiveError> for FileManagerError {
    fn from(err: ArchiveError) -> Self {
        FileManagerError::Archive(err)
    }
}

impl From<StoreError> for FileManagerError {
    fn from(err: StoreError) -> Self {
        FileManagerError::Store(err)
    }
}

/// Path segments taken from a URL must name a direct child directory
fn check_segment(segment: &str) -> Result<(), FileManagerError> {
    if !is_plain_segment(segment) {
        return Err(FileManagerError::Validation(format!("Invalid path segment '{}'", segment)));
    }
    Ok(())
}

/// Sorted entry names of `dir`, only sub-directories when `directories` is set
fn sorted_entries(dir: &Path, directories: bool) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !directories || entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Manages model directories and announces changes on the command queues.
#[derive(Clone)]
pub struct FileManager {
    root: PathBuf,
    store: Arc<dyn ModelStore>,
    queues: QueueNames,
    archive: Arc<dyn ArchiveSource>,
}

impl FileManager {
    /// Creates a file manager over `root`.
    ///
    /// # Arguments
    ///
    /// * `root` - Directory holding `<name>/<version>/` trees
    /// * `store` - Store whose queues receive add/delete commands
    /// * `queues` - Queue names
    /// * `archive` - Source model archives are downloaded from
    pub fn new(
        root: PathBuf,
        store: Arc<dyn ModelStore>,
        queues: QueueNames,
        archive: Arc<dyn ArchiveSource>,
    ) -> Self {
        Self { root, store, queues, archive }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Model directory names, sorted
    pub fn list_models(&self) -> Result<Vec<String>, FileManagerError> {
        sorted_entries(&self.root, true).map_err(FileManagerError::io("Could not read models directory"))
    }

    /// Versions of `name` with the files of each version directory
    pub fn model_details(&self, name: &str) -> Result<ModelDetails, FileManagerError> {
        check_segment(name)?;
        let model_dir = self.root.join(name);
        if !model_dir.is_dir() {
            return Err(FileManagerError::NotFound("Model does not exist".to_string()));
        }

        let versions = sorted_entries(&model_dir, true)
            .map_err(FileManagerError::io("Could not read model directory"))?;
        let mut details = BTreeMap::new();
        for version in versions {
            let files = sorted_entries(&model_dir.join(&version), false)
                .map_err(FileManagerError::io("Could not read model directory"))?;
            details.insert(version, files);
        }

        Ok(ModelDetails {
            model_name: name.to_string(),
            versions: details,
        })
    }

    /// Validates `<name>/<version>` on disk; a failing version is cleaned up
    /// in the background unless the failure was a plain I/O fault.
    pub fn check_model(&self, name: &str, version: &str) -> Result<String, FileManagerError> {
        check_segment(name)?;
        check_segment(version)?;
        match validate_model_files(&self.root, name, version) {
            Ok(_) => Ok(format!("Model '{}/{}' is valid and ready to go", name, version)),
            Err(e) => {
                warn!("Validation of model '{}/{}' failed: {}", name, version, e);
                if e.triggers_cleanup() {
                    self.spawn_cleanup(name, version);
                }
                Err(e.into())
            }
        }
    }

    /// Creates a model version from an archive.
    ///
    /// The name is normalized with [`snake_case`] and the version directory is
    /// created; an existing directory is an error. Asynchronous requests answer
    /// right away and finish in a background task.
    pub async fn create_model(&self, request: CreateModelRequest) -> Result<CreateOutcome, FileManagerError> {
        let name = snake_case(&request.name);
        check_segment(&name)?;
        let version = request.version.to_string();
        let version_dir = self.root.join(&name).join(&version);

        fs::create_dir_all(self.root.join(&name)).map_err(FileManagerError::io("Model creation failed"))?;
        fs::create_dir(&version_dir).map_err(FileManagerError::io("Model creation failed"))?;
        info!("Created directory for model '{}/{}'", name, version);

        // Provisioning runs detached so a dropped request cannot leave a
        // half-populated version behind
        let manager = self.clone();
        let (task_name, task_version, id) = (name.clone(), version.clone(), request.id.clone());
        let provisioning = tokio::spawn(async move {
            let result = manager.provision(&task_name, &task_version, &id).await;
            match &result {
                Ok(msg) => info!("{}", msg),
                Err(e) => error!("Creation of model '{}/{}' failed: {}", task_name, task_version, e),
            }
            result
        });

        if request.async_request {
            return Ok(CreateOutcome::Accepted(
                "Successfully registered request for new model. It will be downloaded soon and will be checked"
                    .to_string(),
            ));
        }

        match provisioning.await {
            Ok(result) => result.map(CreateOutcome::Ready),
            Err(e) => {
                self.spawn_cleanup(&name, &version);
                Err(FileManagerError::Interrupted(e.to_string()))
            }
        }
    }

    /// Downloads, extracts and validates one version, then queues it for
    /// registration. Any failure removes the version again.
    async fn provision(&self, name: &str, version: &str, id: &str) -> Result<String, FileManagerError> {
        let version_dir = self.root.join(name).join(version);

        info!("Downloading archive '{}' for model '{}/{}'", id, name, version);
        if let Err(e) = self.archive.download_and_extract(id, &version_dir).await {
            error!("Download for model '{}/{}' failed: {}", name, version, e);
            self.spawn_cleanup(name, version);
            return Err(e.into());
        }

        let descriptor: ModelDescriptor = match validate_model_files(&self.root, name, version) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                error!("Model '{}/{}' failed validation: {}", name, version, e);
                self.spawn_cleanup(name, version);
                return Err(e.into());
            }
        };

        let command = ModelCommand::exact(name, version);
        if let Err(e) = self.store.push(&self.queues.add_model, &command.entry()).await {
            self.spawn_cleanup(name, version);
            return Err(e.into());
        }
        info!("Model '{}' queued for registration", command);

        Ok(format!(
            "Model '{}/{}' is valid and ready to go",
            descriptor.name, descriptor.version
        ))
    }

    /// Replaces an existing version with a fresh download.
    pub async fn update_model(&self, request: CreateModelRequest) -> Result<String, FileManagerError> {
        let name = snake_case(&request.name);
        check_segment(&name)?;
        let version = request.version;
        let version_dir = self.root.join(&name).join(version.to_string());

        if !version_dir.is_dir() {
            return Err(FileManagerError::NotFound("Model or version not found".to_string()));
        }
        fs::remove_dir_all(&version_dir).map_err(FileManagerError::io("Model update failed"))?;

        let is_async = request.async_request;
        self.create_model(request)
            .await
            .map_err(|e| FileManagerError::UpdateFailed(Box::new(e)))?;

        if is_async {
            Ok(format!(
                "Update for model '{}' version '{}' was registered. Files will be replaced soon",
                name, version
            ))
        } else {
            Ok(format!("Model '{}' version '{}' is updated and ready to go", name, version))
        }
    }

    /// Queues removal of every version of `name` and deletes its tree.
    pub async fn delete_model(&self, name: &str) -> Result<String, FileManagerError> {
        check_segment(name)?;
        let model_dir = self.root.join(name);
        if !model_dir.is_dir() {
            return Err(FileManagerError::NotFound("Model not found".to_string()));
        }

        self.store
            .push(&self.queues.delete_model, &ModelCommand::all_versions(name).entry())
            .await?;
        fs::remove_dir_all(&model_dir).map_err(FileManagerError::io("Model could not be removed"))?;
        info!("Model '{}' removed", name);

        Ok("Model successfully removed".to_string())
    }

    /// Queues removal of `<name>/<version>` and deletes the version directory,
    /// and the model directory too once it holds no versions.
    pub async fn delete_model_version(&self, name: &str, version: &str) -> Result<String, FileManagerError> {
        check_segment(name)?;
        check_segment(version)?;
        let model_dir = self.root.join(name);
        let version_dir = model_dir.join(version);
        if !version_dir.is_dir() {
            return Err(FileManagerError::NotFound("Model or version not found".to_string()));
        }

        self.store
            .push(&self.queues.delete_model, &ModelCommand::exact(name, version).entry())
            .await?;

        let removal_error = "Model directory removal failed";
        fs::remove_dir_all(&version_dir).map_err(FileManagerError::io(removal_error))?;

        let is_empty = fs::read_dir(&model_dir)
            .map_err(FileManagerError::io(removal_error))?
            .next()
            .is_none();
        if is_empty {
            fs::remove_dir(&model_dir).map_err(FileManagerError::io(removal_error))?;
            info!("Model '{}' has no versions left, directory removed", name);
        }

        info!("Model version '{}/{}' removed", name, version);
        Ok(format!(
            "Model version '{}' from model '{}' successfully removed",
            version, name
        ))
    }

    /// Removes `<name>/<version>` in a background task.
    pub fn spawn_cleanup(&self, name: &str, version: &str) -> JoinHandle<()> {
        let manager = self.clone();
        let name = name.to_string();
        let version = version.to_string();
        tokio::spawn(async move {
            match manager.delete_model_version(&name, &version).await {
                Ok(_) => info!("Cleaned up model '{}/{}'", name, version),
                Err(e) => warn!("Cleanup of model '{}/{}' failed: {}", name, version, e),
            }
        })
    }
}
