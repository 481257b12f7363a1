use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use futures::{
    StreamExt,
    future::BoxFuture,
    stream::{self, BoxStream},
};
use tokio_stream::wrappers::ReadDirStream;

use crate::{
    queue::{ItemInfo, QueueItem},
    source::Source,
};

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("no match for {0}")]
    NoMatch(String),

    #[error("{0} is not supported")]
    Unsupported(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("resolution failed: {0}")]
    ResolutionFailed(String),
}

/// A playable source with the metadata shown to users.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub source: Source,
    pub info: ItemInfo,
}

impl Resolved {
    pub fn into_item(self, requested_by: impl Into<String>) -> Arc<QueueItem> {
        QueueItem::new(self.source, self.info, requested_by)
    }
}

pub type ResolvedStream = BoxStream<'static, Result<Resolved, ResolveError>>;

/// Turns what users type into playable sources.
pub trait Resolver: Send + Sync + 'static {
    fn resolve<'a>(&'a self, link: &'a str) -> BoxFuture<'a, Result<Resolved, ResolveError>>;

    /// First hit for a free-text query.
    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Resolved, ResolveError>>;

    /// Entries of a playlist in order. Entries are resolved lazily; a failed
    /// entry is yielded as an error and does not end the stream.
    fn playlist<'a>(
        &'a self,
        reference: &'a str,
    ) -> BoxFuture<'a, Result<ResolvedStream, ResolveError>>;
}

const YOUTUBE_PATTERNS: [&str; 5] = [
    "youtube.com/watch?v=",
    "youtube.com/v/",
    "youtube.com/embed/",
    "youtube.com/e/",
    "youtu.be/",
];

const YOUTUBE_ID_LEN: usize = 11;

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Extracts the 11 character video id from the common YouTube link shapes.
pub fn youtube_id(link: &str) -> Option<&str> {
    YOUTUBE_PATTERNS.iter().find_map(|pattern| {
        let start = link.find(pattern)? + pattern.len();
        let rest = &link[start..];
        let len = rest.find(|c: char| !is_id_char(c)).unwrap_or(rest.len());
        (len == YOUTUBE_ID_LEN).then(|| &rest[..len])
    })
}

/// Resolves local files, directories, `.m3u` playlists and YouTube links.
/// YouTube audio is fetched by running `downloader` with the video id
/// appended; it must write raw frames to stdout.
#[derive(Debug, Clone)]
pub struct LocalResolver {
    downloader: Arc<Vec<String>>,
    library: Option<PathBuf>,
}

impl LocalResolver {
    pub fn new(downloader: Vec<String>, library: Option<PathBuf>) -> Self {
        Self {
            downloader: Arc::new(downloader),
            library,
        }
    }

    async fn resolve_link(&self, link: &str) -> Result<Resolved, ResolveError> {
        if let Some(id) = youtube_id(link) {
            return self.youtube(id);
        }

        let path = Path::new(link);
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(file_entry(path.to_path_buf(), None)),
            Ok(_) => Err(ResolveError::NoMatch(link.to_string())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(ResolveError::NoMatch(link.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn youtube(&self, id: &str) -> Result<Resolved, ResolveError> {
        let Some((program, args)) = self.downloader.split_first() else {
            return Err(ResolveError::Unsupported("youtube links without a downloader"));
        };

        let mut args = args.to_vec();
        args.push(id.to_string());
        Ok(Resolved {
            source: Source::Process {
                program: program.clone(),
                args,
            },
            info: ItemInfo {
                title: format!("youtube {id}"),
                duration: None,
                link: format!("https://youtu.be/{id}"),
            },
        })
    }

    async fn search_library(&self, query: &str) -> Result<Resolved, ResolveError> {
        let library = self
            .library
            .as_deref()
            .ok_or(ResolveError::Unsupported("search without a library"))?;

        let words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        if words.is_empty() {
            return Err(ResolveError::NoMatch(query.to_string()));
        }

        let hit = list_files(library).await?.into_iter().find(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            words.iter().all(|word| name.contains(word.as_str()))
        });

        match hit {
            Some(path) => Ok(file_entry(path, None)),
            None => Err(ResolveError::NoMatch(query.to_string())),
        }
    }

    async fn open_playlist(&self, reference: &str) -> Result<ResolvedStream, ResolveError> {
        if reference.contains("list=") {
            return Err(ResolveError::Unsupported("youtube playlists"));
        }

        let path = Path::new(reference);
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ResolveError::NoMatch(reference.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let entries: Vec<Entry> = if meta.is_dir() {
            list_files(path)
                .await?
                .into_iter()
                .map(|path| Entry {
                    target: path.to_string_lossy().into_owned(),
                    extinf: None,
                })
                .collect()
        } else if is_m3u(path) {
            let text = tokio::fs::read_to_string(path).await?;
            parse_m3u(&text, path.parent().unwrap_or(Path::new(".")))
        } else {
            return Err(ResolveError::Unsupported("this playlist format"));
        };

        let resolver = self.clone();
        let stream = stream::iter(entries).then(move |entry| {
            let resolver = resolver.clone();
            async move {
                let mut resolved = resolver.resolve_link(&entry.target).await?;
                if let Some((title, duration)) = entry.extinf {
                    resolved.info.title = title;
                    resolved.info.duration = duration;
                }
                Ok::<_, ResolveError>(resolved)
            }
        });
        Ok(stream.boxed())
    }
}

impl Resolver for LocalResolver {
    fn resolve<'a>(&'a self, link: &'a str) -> BoxFuture<'a, Result<Resolved, ResolveError>> {
        Box::pin(self.resolve_link(link))
    }

    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Resolved, ResolveError>> {
        Box::pin(self.search_library(query))
    }

    fn playlist<'a>(
        &'a self,
        reference: &'a str,
    ) -> BoxFuture<'a, Result<ResolvedStream, ResolveError>> {
        Box::pin(self.open_playlist(reference))
    }
}

fn file_entry(path: PathBuf, duration: Option<Duration>) -> Resolved {
    let title = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let link = path.display().to_string();
    Resolved {
        source: Source::File(path),
        info: ItemInfo {
            title,
            duration,
            link,
        },
    }
}

fn is_m3u(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("m3u") || ext.eq_ignore_ascii_case("m3u8"))
}

/// Regular files of a directory, sorted by name.
async fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let entries = ReadDirStream::new(tokio::fs::read_dir(dir).await?);
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| async move {
            let entry = entry.ok()?;
            let file_type = entry.file_type().await.ok()?;
            file_type.is_file().then(|| entry.path())
        })
        .collect()
        .await;
    files.sort();
    Ok(files)
}

#[derive(Debug, PartialEq)]
struct Entry {
    target: String,
    extinf: Option<(String, Option<Duration>)>,
}

fn parse_m3u(text: &str, base: &Path) -> Vec<Entry> {
    let mut entries = Vec::new();
    let mut extinf = None;

    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(info) = line.strip_prefix("#EXTINF:") {
            extinf = info.split_once(',').map(|(secs, title)| {
                let duration = secs
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .map(Duration::from_secs);
                (title.trim().to_string(), duration)
            });
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let target = if youtube_id(line).is_some() || Path::new(line).is_absolute() {
            line.to_string()
        } else {
            base.join(line).to_string_lossy().into_owned()
        };
        entries.push(Entry {
            target,
            extinf: extinf.take(),
        });
    }
    entries
}
