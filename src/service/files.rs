//! FileGroup and File orchestration.
//!
//! A group is created empty through [`Service::create`]. Uploads then run as
//! batches: [`Service::begin_upload`] snapshots the group, every
//! [`UploadBatch::add`] writes one File record, and [`UploadBatch::commit`]
//! appends the descriptors to the group with a compare-and-swap, so batches
//! committing to one group at once all land. The batch as a whole is not
//! atomic: a group deleted while it is in flight is caught at commit and the
//! batch's files are removed again.

use crate::error::{Error, Result};
use crate::id::MAX_ID_ATTEMPTS;
use crate::media::essence_of;
use crate::meta::Meta;
use crate::model::{File, FileGroup, Kind};
use crate::storage::FetchOpts;

use super::Service;

const OCTET_STREAM: &str = "application/octet-stream";
const TEXT_UTF8: &str = "text/plain; charset=utf-8";
/// Leading bytes handed to magic-number detection.
const SNIFF_LEN: usize = 512;

/// One multipart section, fully read.
#[derive(Debug, Clone, Default)]
pub struct UploadPart {
    /// Form field name.
    pub name: String,
    pub filename: String,
    /// Content type declared on the part, if any.
    pub content_type: Option<String>,
    pub contents: Vec<u8>,
}

/// Raw file bytes plus the descriptor recorded in the owning group, when
/// there is one.
#[derive(Debug, Clone)]
pub struct FileContents {
    pub contents: Vec<u8>,
    pub descriptor: Option<File>,
}

impl FileContents {
    pub fn mime(&self) -> &str {
        self.descriptor
            .as_ref()
            .map(|d| d.mime.as_str())
            .filter(|m| !m.is_empty())
            .unwrap_or(OCTET_STREAM)
    }
}

/// Pick a MIME type for an uploaded part: the declared type unless it is
/// missing or generic, then the filename extension, then magic bytes, then a
/// UTF-8 check.
pub fn infer_mime(declared: Option<&str>, filename: &str, contents: &[u8]) -> String {
    if let Some(declared) = declared {
        if essence_of(declared).is_some_and(|e| e != OCTET_STREAM) {
            return declared.trim().to_string();
        }
    }

    if let Some(guess) = mime_guess::from_path(filename).first_raw() {
        return guess.to_string();
    }

    let head = &contents[..contents.len().min(SNIFF_LEN)];
    if let Some(kind) = infer::get(head) {
        return kind.mime_type().to_string();
    }

    if std::str::from_utf8(contents).is_ok() {
        TEXT_UTF8.to_string()
    } else {
        OCTET_STREAM.to_string()
    }
}

/// An upload in progress against one group.
pub struct UploadBatch<'a> {
    service: &'a Service,
    group_id: String,
    meta: Meta,
    expires_at: Option<i64>,
    files: Vec<File>,
}

impl Service {
    /// Start an upload into group `group_id`. Reading the group here does
    /// not burn it.
    pub async fn begin_upload(&self, group_id: &str) -> Result<UploadBatch<'_>> {
        // fails with NotFound when the group is gone or expired
        let info = self.storage.get_info(Kind::FileGroup, group_id).await?;
        Ok(UploadBatch {
            service: self,
            group_id: group_id.to_string(),
            meta: info.meta,
            expires_at: info.expires_at,
            files: Vec::new(),
        })
    }

    /// Fetch a group descriptor. A burn-flagged group is consumed; its files
    /// are not.
    pub async fn get_group(&self, group_id: &str) -> Result<FileGroup> {
        self.get::<FileGroup>(group_id).await
    }

    /// Delete a group and every file it lists. Files already gone are
    /// skipped; only the group's own delete can fail the call.
    pub async fn delete_group(&self, group_id: &str) -> Result<()> {
        let group: FileGroup = self
            .storage
            .get_typed(Kind::FileGroup, group_id, FetchOpts::DONT_BURN)
            .await?;

        for file in &group.files {
            match self.storage.delete(Kind::File, &file.id).await {
                Ok(()) => tracing::debug!(group_id, file_id = %file.id, "deleted file"),
                Err(e) => tracing::warn!(group_id, file_id = %file.id, error = %e, "skipping file during group delete"),
            }
        }

        self.storage.delete(Kind::FileGroup, group_id).await?;
        tracing::info!(group_id, files = group.files.len(), "deleted file group");
        Ok(())
    }

    /// Raw bytes of one file. With a group id, the descriptor (name, MIME)
    /// is looked up in that group; a missing group or a file it does not list
    /// just leaves the descriptor empty.
    pub async fn get_file(&self, group_id: Option<&str>, file_id: &str) -> Result<FileContents> {
        let contents = self
            .storage
            .get_bytes(Kind::File, file_id, FetchOpts::default())
            .await?;

        let descriptor = match group_id {
            Some(gid) => self.find_descriptor(gid, file_id).await,
            None => None,
        };
        Ok(FileContents {
            contents,
            descriptor,
        })
    }

    async fn find_descriptor(&self, group_id: &str, file_id: &str) -> Option<File> {
        let group = self
            .storage
            .get_typed::<FileGroup>(Kind::FileGroup, group_id, FetchOpts::DONT_BURN)
            .await;
        match group {
            Ok(group) => group.files.into_iter().find(|f| f.id == file_id),
            Err(Error::NotFound) => None,
            Err(e) => {
                tracing::warn!(group_id, file_id, error = %e, "could not read group for file descriptor");
                None
            }
        }
    }

    async fn remove_files(&self, group_id: &str, files: &[File]) {
        for file in files {
            if let Err(e) = self.storage.delete(Kind::File, &file.id).await {
                tracing::error!(group_id, file_id = %file.id, error = %e, "failed to remove uploaded file");
            }
        }
    }
}

impl UploadBatch<'_> {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn files(&self) -> &[File] {
        &self.files
    }

    /// Persist one part as a File record inheriting the group's flags and
    /// expiry.
    pub async fn add(&mut self, part: UploadPart) -> Result<&File> {
        let storage = &self.service.storage;
        let mime = infer_mime(part.content_type.as_deref(), &part.filename, &part.contents);
        let size = part.contents.len();

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let id = self.service.ids.next_id();
            let created = storage
                .create_until(Kind::File, &id, part.contents.clone(), self.meta, self.expires_at)
                .await?;
            if !created {
                tracing::warn!(group_id = %self.group_id, file_id = %id, attempt, "identifier collision, retrying");
                continue;
            }

            tracing::debug!(group_id = %self.group_id, file_id = %id, %mime, size, "stored uploaded file");
            let index = self.files.len();
            self.files.push(File {
                id,
                name: part.name,
                filename: part.filename,
                mime,
            });
            return Ok(&self.files[index]);
        }

        tracing::error!(group_id = %self.group_id, attempts = MAX_ID_ATTEMPTS, "identifier space exhausted");
        Err(Error::Storage("identifier space exhausted".into()))
    }

    /// Append this batch to the group. Concurrent commits to the same group
    /// all land. If the group was deleted meanwhile, or the write fails, the
    /// batch's files are removed and the upload fails.
    pub async fn commit(self) -> Result<FileGroup> {
        let added = &self.files;
        let updated = self
            .service
            .storage
            .update(Kind::FileGroup, &self.group_id, |group: &mut FileGroup| {
                group.files.extend(added.iter().cloned());
            })
            .await;

        match updated {
            Ok(group) => {
                tracing::info!(group_id = %self.group_id, added = added.len(), total = group.files.len(), "appended files to group");
                Ok(group)
            }
            Err(Error::NotFound) => {
                tracing::warn!(group_id = %self.group_id, files = added.len(), "group deleted during upload, rolling back");
                self.service.remove_files(&self.group_id, added).await;
                Err(Error::GroupDeleted(self.group_id))
            }
            Err(e) => {
                tracing::warn!(group_id = %self.group_id, files = added.len(), error = %e, "failed to append files, rolling back");
                self.service.remove_files(&self.group_id, added).await;
                Err(e)
            }
        }
    }

    /// Drop the batch, removing whatever it already wrote.
    pub async fn abort(self) {
        if self.files.is_empty() {
            return;
        }
        tracing::warn!(group_id = %self.group_id, files = self.files.len(), "upload aborted, rolling back");
        self.service.remove_files(&self.group_id, &self.files).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_type_wins() {
        assert_eq!(infer_mime(Some("image/png"), "a.txt", b"hello"), "image/png");
    }

    #[test]
    fn test_generic_declared_type_ignored() {
        assert_eq!(
            infer_mime(Some("application/octet-stream"), "notes.txt", b"x"),
            "text/plain"
        );
    }

    #[test]
    fn test_extension_then_magic_bytes() {
        assert_eq!(infer_mime(None, "photo.jpg", b""), "image/jpeg");
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        assert_eq!(infer_mime(None, "blob", png), "image/png");
    }

    #[test]
    fn test_fallbacks() {
        assert_eq!(infer_mime(None, "README", b"plain words"), TEXT_UTF8);
        assert_eq!(infer_mime(None, "", &[0x00, 0x81, 0x00, 0x9f]), OCTET_STREAM);
    }
}
