//! Abstract blob storage (spec.md §1 treats this as an out-of-scope external
//! collaborator with a `Put/Get JSON` interface). Implemented here as a
//! filesystem-backed store using the teacher's disk-cache technique (write
//! to a temp file, `sync_all`, atomic rename) so a partial write never
//! corrupts a previously published blob.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.context("creating blob store root")?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let final_path = self.path_for(key);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp_path = final_path.with_extension("json.tmp");

        let bytes = serde_json::to_vec(value)?;
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Slugifies a country name/code into a safe blob key segment.
    pub fn country_slug(country: &str) -> String {
        let mut out = String::with_capacity(country.len());
        for ch in country.chars() {
            if ch.is_ascii_alphanumeric() {
                out.push(ch.to_ascii_lowercase());
            } else if !out.ends_with('-') {
                out.push('-');
            }
        }
        out.trim_matches('-').to_string()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        value: u32,
    }

    #[tokio::test]
    async fn round_trips_through_filesystem() {
        let dir = std::env::temp_dir().join(format!("radio-blob-test-{}", std::process::id()));
        let store = BlobStore::new(&dir).await.unwrap();
        store.put_json("aggregate", &Sample { value: 42 }).await.unwrap();
        let loaded: Sample = store.get_json("aggregate").await.unwrap().unwrap();
        assert_eq!(loaded, Sample { value: 42 });
        let _ = fs::remove_dir_all(&dir).await;
    }

    #[test]
    fn slugifies_country_names() {
        assert_eq!(BlobStore::country_slug("United States"), "united-states");
        assert_eq!(BlobStore::country_slug("Côte d'Ivoire"), "c-te-d-ivoire");
    }
}
