//! SFTP subsystem handler for the internal SSH server.
//!
//! Implements the subset of operations the interactive SFTP prompt uses:
//! path resolution, directory listing, stat and sequential file read/write.
//! Everything else reports "operation unsupported".

use std::collections::HashMap;
use std::future::Future;
use std::io::SeekFrom;

use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

enum OpenEntry {
    File(tokio::fs::File),
    /// Snapshot of a directory; drained by the first READDIR.
    Dir(Option<Vec<File>>),
}

#[derive(Default)]
pub(super) struct SftpHandler {
    next_handle: u64,
    open: HashMap<String, OpenEntry>,
}

impl SftpHandler {
    fn allocate(&mut self, entry: OpenEntry) -> String {
        self.next_handle += 1;
        let handle = self.next_handle.to_string();
        self.open.insert(handle.clone(), entry);
        handle
    }

    fn ok_status(id: u32) -> Status {
        Status {
            id,
            status_code: StatusCode::Ok,
            error_message: "Ok".to_string(),
            language_tag: "en-US".to_string(),
        }
    }
}

impl russh_sftp::server::Handler for SftpHandler {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    fn init(
        &mut self,
        version: u32,
        extensions: HashMap<String, String>,
    ) -> impl Future<Output = Result<Version, Self::Error>> + Send {
        async move {
            debug!(version, ?extensions, "sftp session initialized");
            Ok(Version::new())
        }
    }

    fn realpath(
        &mut self,
        id: u32,
        path: String,
    ) -> impl Future<Output = Result<Name, Self::Error>> + Send {
        async move {
            let resolved = tokio::fs::canonicalize(&path)
                .await
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or(path);
            Ok(Name {
                id,
                files: vec![File::dummy(&resolved)],
            })
        }
    }

    fn opendir(
        &mut self,
        id: u32,
        path: String,
    ) -> impl Future<Output = Result<Handle, Self::Error>> + Send {
        async move {
            let mut entries = tokio::fs::read_dir(&path)
                .await
                .map_err(|_| StatusCode::NoSuchFile)?;
            let mut files = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name().to_string_lossy().into_owned();
                let attrs = match entry.metadata().await {
                    Ok(metadata) => FileAttributes::from(&metadata),
                    Err(_) => FileAttributes::default(),
                };
                files.push(File::new(&name, attrs));
            }
            Ok(Handle {
                id,
                handle: self.allocate(OpenEntry::Dir(Some(files))),
            })
        }
    }

    fn readdir(
        &mut self,
        id: u32,
        handle: String,
    ) -> impl Future<Output = Result<Name, Self::Error>> + Send {
        async move {
            match self.open.get_mut(&handle) {
                Some(OpenEntry::Dir(files)) => match files.take() {
                    Some(files) => Ok(Name { id, files }),
                    None => Err(StatusCode::Eof),
                },
                _ => Err(StatusCode::Failure),
            }
        }
    }

    fn close(
        &mut self,
        id: u32,
        handle: String,
    ) -> impl Future<Output = Result<Status, Self::Error>> + Send {
        async move {
            self.open.remove(&handle);
            Ok(Self::ok_status(id))
        }
    }

    fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> impl Future<Output = Result<Handle, Self::Error>> + Send {
        async move {
            let file = tokio::fs::OpenOptions::new()
                .read(pflags.contains(OpenFlags::READ))
                .write(pflags.contains(OpenFlags::WRITE))
                .create(pflags.contains(OpenFlags::CREATE))
                .truncate(pflags.contains(OpenFlags::TRUNCATE))
                .append(pflags.contains(OpenFlags::APPEND))
                .open(&filename)
                .await
                .map_err(|_| StatusCode::NoSuchFile)?;
            Ok(Handle {
                id,
                handle: self.allocate(OpenEntry::File(file)),
            })
        }
    }

    fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> impl Future<Output = Result<Data, Self::Error>> + Send {
        async move {
            let Some(OpenEntry::File(file)) = self.open.get_mut(&handle) else {
                return Err(StatusCode::Failure);
            };
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|_| StatusCode::Failure)?;
            let mut data = vec![0u8; len as usize];
            let mut filled = 0;
            while filled < data.len() {
                match file.read(&mut data[filled..]).await {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(_) => return Err(StatusCode::Failure),
                }
            }
            if filled == 0 {
                return Err(StatusCode::Eof);
            }
            data.truncate(filled);
            Ok(Data { id, data })
        }
    }

    fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> impl Future<Output = Result<Status, Self::Error>> + Send {
        async move {
            let Some(OpenEntry::File(file)) = self.open.get_mut(&handle) else {
                return Err(StatusCode::Failure);
            };
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|_| StatusCode::Failure)?;
            file.write_all(&data).await.map_err(|_| StatusCode::Failure)?;
            Ok(Self::ok_status(id))
        }
    }

    fn stat(
        &mut self,
        id: u32,
        path: String,
    ) -> impl Future<Output = Result<Attrs, Self::Error>> + Send {
        async move {
            let metadata = tokio::fs::metadata(&path)
                .await
                .map_err(|_| StatusCode::NoSuchFile)?;
            Ok(Attrs {
                id,
                attrs: FileAttributes::from(&metadata),
            })
        }
    }

    fn lstat(
        &mut self,
        id: u32,
        path: String,
    ) -> impl Future<Output = Result<Attrs, Self::Error>> + Send {
        async move {
            let metadata = tokio::fs::symlink_metadata(&path)
                .await
                .map_err(|_| StatusCode::NoSuchFile)?;
            Ok(Attrs {
                id,
                attrs: FileAttributes::from(&metadata),
            })
        }
    }

    fn fstat(
        &mut self,
        id: u32,
        handle: String,
    ) -> impl Future<Output = Result<Attrs, Self::Error>> + Send {
        async move {
            let Some(OpenEntry::File(file)) = self.open.get_mut(&handle) else {
                return Err(StatusCode::Failure);
            };
            let metadata = file.metadata().await.map_err(|_| StatusCode::Failure)?;
            Ok(Attrs {
                id,
                attrs: FileAttributes::from(&metadata),
            })
        }
    }
}
