//! Slots for the current best model: in memory, or spilled to a run directory.

use mt_types::{PersistenceError, PersistenceResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the persisted best model inside a run directory.
pub const BEST_MODEL_FILE: &str = "best_model.json";

/// Holds exactly one best model for the tuner.
pub trait ModelStore<M> {
    /// Replace the current best model, releasing the previous one.
    fn save(&mut self, model: M) -> PersistenceResult<()>;

    /// Hand the best model to the caller. Returns `None` if nothing was saved.
    fn take_best(&mut self) -> PersistenceResult<Option<M>>;

    /// Drop any model left over from an earlier search.
    fn clear(&mut self) -> PersistenceResult<()>;

    /// Directory that run artifacts are written to, if any.
    fn run_dir(&self) -> Option<&Path> {
        None
    }
}

impl<M, S: ModelStore<M> + ?Sized> ModelStore<M> for Box<S> {
    fn save(&mut self, model: M) -> PersistenceResult<()> {
        (**self).save(model)
    }

    fn take_best(&mut self) -> PersistenceResult<Option<M>> {
        (**self).take_best()
    }

    fn clear(&mut self) -> PersistenceResult<()> {
        (**self).clear()
    }

    fn run_dir(&self) -> Option<&Path> {
        (**self).run_dir()
    }
}

/// Keeps the best model in memory for the whole search.
#[derive(Debug)]
pub struct InMemoryStore<M> {
    slot: Option<M>,
}

impl<M> InMemoryStore<M> {
    pub fn new() -> Self {
        Self { slot: None }
    }

    pub fn peek(&self) -> Option<&M> {
        self.slot.as_ref()
    }
}

impl<M> Default for InMemoryStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> ModelStore<M> for InMemoryStore<M> {
    fn save(&mut self, model: M) -> PersistenceResult<()> {
        self.slot = Some(model);
        Ok(())
    }

    fn take_best(&mut self) -> PersistenceResult<Option<M>> {
        Ok(self.slot.take())
    }

    fn clear(&mut self) -> PersistenceResult<()> {
        self.slot = None;
        Ok(())
    }
}

/// Serializes the best model to `<run_dir>/best_model.json` on every save,
/// so only one copy lives in memory while a trial is being trained.
#[derive(Debug)]
pub struct FileStore {
    run_dir: PathBuf,
    path: PathBuf,
    clean_up: bool,
    saved: bool,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(run_dir: P) -> PersistenceResult<Self> {
        let run_dir = run_dir.as_ref().to_path_buf();
        fs::create_dir_all(&run_dir).map_err(|source| PersistenceError::Io {
            path: run_dir.clone(),
            source,
        })?;
        let path = run_dir.join(BEST_MODEL_FILE);

        Ok(Self {
            run_dir,
            path,
            clean_up: true,
            saved: false,
        })
    }

    /// Keep the model file on disk after `take_best` (default: remove it).
    pub fn keep_file(mut self) -> Self {
        self.clean_up = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError {
    let path = path.to_path_buf();
    move |source| PersistenceError::Io { path, source }
}

impl<M: Serialize + DeserializeOwned> ModelStore<M> for FileStore {
    fn save(&mut self, model: M) -> PersistenceResult<()> {
        let tmp = self.path.with_extension("json.tmp");
        let file = File::create(&tmp).map_err(io_error(&tmp))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &model).map_err(|source| {
            PersistenceError::Serialization {
                path: tmp.clone(),
                source,
            }
        })?;
        writer.flush().map_err(io_error(&tmp))?;
        drop(writer);

        fs::rename(&tmp, &self.path).map_err(io_error(&self.path))?;
        self.saved = true;
        debug!(path = %self.path.display(), "Saved best model");
        Ok(())
    }

    fn take_best(&mut self) -> PersistenceResult<Option<M>> {
        if !self.saved {
            return Ok(None);
        }
        if !self.path.exists() {
            return Err(PersistenceError::Missing {
                path: self.path.clone(),
            });
        }

        let file = File::open(&self.path).map_err(io_error(&self.path))?;
        let model = serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            PersistenceError::Serialization {
                path: self.path.clone(),
                source,
            }
        })?;

        if self.clean_up {
            fs::remove_file(&self.path).map_err(io_error(&self.path))?;
            self.saved = false;
        }
        Ok(Some(model))
    }

    fn clear(&mut self) -> PersistenceResult<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(io_error(&self.path))?;
        }
        self.saved = false;
        Ok(())
    }

    fn run_dir(&self) -> Option<&Path> {
        Some(&self.run_dir)
    }
}
