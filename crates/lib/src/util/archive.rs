//! Gzipped tar codec for cache directories and build contexts.

use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive, Builder, Header};
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
  #[error("failed to archive {path}: {source}")]
  Pack {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to unpack into {path}: {source}")]
  Unpack {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to walk {path}: {message}")]
  Walk { path: PathBuf, message: String },

  #[error("refusing to unpack entry outside destination: {0}")]
  UnsafeEntry(PathBuf),
}

/// Gzipped tar of every regular file and directory below `dir`, with paths
/// relative to `dir`. Entries are added in sorted order.
pub fn gzip_tar_dir(dir: &Path) -> Result<Vec<u8>, ArchiveError> {
  let pack_err = |source| ArchiveError::Pack {
    path: dir.to_path_buf(),
    source,
  };

  let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
  builder.follow_symlinks(false);

  for entry in WalkDir::new(dir).sort_by_file_name().min_depth(1) {
    let entry = entry.map_err(|e| ArchiveError::Walk {
      path: dir.to_path_buf(),
      message: e.to_string(),
    })?;
    let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
    let file_type = entry.file_type();
    if file_type.is_dir() {
      builder.append_dir(rel, entry.path()).map_err(pack_err)?;
    } else if file_type.is_file() || file_type.is_symlink() {
      builder.append_path_with_name(entry.path(), rel).map_err(pack_err)?;
    }
  }

  finish(builder).map_err(pack_err)
}

/// Gzipped tar built from explicit `(archive name, file on disk)` pairs plus
/// in-memory `(archive name, bytes)` entries.
pub fn gzip_tar_entries(files: &[(String, PathBuf)], extra: &[(String, Vec<u8>)]) -> Result<Vec<u8>, ArchiveError> {
  let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

  for (name, path) in files {
    let mut file = File::open(path).map_err(|source| ArchiveError::Pack {
      path: path.clone(),
      source,
    })?;
    builder
      .append_file(name, &mut file)
      .map_err(|source| ArchiveError::Pack {
        path: path.clone(),
        source,
      })?;
  }

  for (name, bytes) in extra {
    let mut header = Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
      .append_data(&mut header, name, bytes.as_slice())
      .map_err(|source| ArchiveError::Pack {
        path: PathBuf::from(name),
        source,
      })?;
  }

  finish(builder).map_err(|source| ArchiveError::Pack {
    path: PathBuf::from("<context>"),
    source,
  })
}

fn finish(builder: Builder<GzEncoder<Vec<u8>>>) -> std::io::Result<Vec<u8>> {
  let mut encoder = builder.into_inner()?;
  encoder.flush()?;
  encoder.finish()
}

/// Unpack a gzipped tar stream into `dest`, creating it if needed.
pub fn gzip_untar<R: Read>(reader: R, dest: &Path) -> Result<(), ArchiveError> {
  let unpack_err = |source| ArchiveError::Unpack {
    path: dest.to_path_buf(),
    source,
  };

  fs::create_dir_all(dest).map_err(unpack_err)?;

  let decoder = GzDecoder::new(BufReader::new(reader));
  let mut archive = Archive::new(decoder);

  for entry in archive.entries().map_err(unpack_err)? {
    let mut entry = entry.map_err(unpack_err)?;
    let path = entry.path().map_err(unpack_err)?.into_owned();

    if path.is_absolute() || path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
      return Err(ArchiveError::UnsafeEntry(path));
    }

    let dest_path = dest.join(&path);

    if let Some(parent) = dest_path.parent() {
      fs::create_dir_all(parent).map_err(unpack_err)?;
    }

    entry.unpack(&dest_path).map_err(unpack_err)?;
  }

  Ok(())
}
