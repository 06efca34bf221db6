//! Command-backed converters for the supported foreign VCS tools.
//!
//! Each converter drives the native client (`git`, `svn`, `bzr`, `cvs`)
//! through `tokio::process` and parses its log output into [`Revision`]
//! records. History translation here is deliberately coarse; the pipeline
//! only requires commit ordering, authorship and timestamps, with revision
//! identity carried by the tool's own identifiers.

use std::ffi::OsStr;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::{ImportError, Result};
use crate::scheduler::job::Revision;
use crate::vcs::{RevisionMarker, VcsConverter};

/// Run an external VCS tool and capture stdout. On a non-zero exit the
/// trimmed stderr becomes the error message.
async fn run_tool<I, S>(
    program: &str,
    args: I,
    cwd: Option<&Path>,
) -> std::result::Result<String, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    tracing::debug!(tool = program, "Running VCS tool");
    let output = cmd
        .output()
        .await
        .map_err(|e| format!("can't run {}: {}", program, e))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!(
            "{} exited with {}: {}",
            program,
            output.status.code().unwrap_or(-1),
            stderr.trim()
        ))
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

pub struct GitConverter;

impl GitConverter {
    async fn tip(&self, workdir: &Path) -> Result<RevisionMarker> {
        let out = run_tool("git", ["-C", path_str(workdir).as_str(), "rev-parse", "HEAD"], None)
            .await
            .map_err(ImportError::SourceUnavailable)?;
        Ok(RevisionMarker(out.trim().to_string()))
    }
}

/// One revision per log line, fields separated by an ASCII unit separator.
const GIT_LOG_FORMAT: &str = "--format=%H%x1f%an%x1f%s%x1f%aI";

fn parse_git_log_line(line: &str) -> Option<Revision> {
    let mut fields = line.split('\u{1f}');
    let id = fields.next()?.to_string();
    let author = fields.next()?.to_string();
    let message = fields.next()?.to_string();
    let timestamp = DateTime::parse_from_rfc3339(fields.next()?.trim())
        .ok()?
        .with_timezone(&Utc);
    Some(Revision {
        id,
        author,
        message,
        timestamp,
    })
}

#[async_trait]
impl VcsConverter for GitConverter {
    async fn checkout(&self, url: &str, workdir: &Path) -> Result<RevisionMarker> {
        run_tool("git", ["clone", "--quiet", url, path_str(workdir).as_str()], None)
            .await
            .map_err(ImportError::SourceUnavailable)?;
        self.tip(workdir).await
    }

    async fn update(&self, _url: &str, workdir: &Path) -> Result<RevisionMarker> {
        // Fast-forward only: a rewritten upstream fails here and the tree
        // store falls back to a fresh checkout.
        run_tool(
            "git",
            ["-C", path_str(workdir).as_str(), "pull", "--ff-only", "--quiet"],
            None,
        )
        .await
        .map_err(ImportError::SourceUnavailable)?;
        self.tip(workdir).await
    }

    async fn translate(
        &self,
        workdir: &Path,
        since: Option<&RevisionMarker>,
    ) -> Result<Vec<Revision>> {
        let dir = path_str(workdir);
        let mut args = vec!["-C", dir.as_str(), "log", "--reverse", GIT_LOG_FORMAT];
        let range;
        if let Some(marker) = since {
            range = format!("{}..HEAD", marker);
            args.push(range.as_str());
        }
        let out = run_tool("git", args, None)
            .await
            .map_err(ImportError::Conversion)?;
        Ok(out.lines().filter_map(parse_git_log_line).collect())
    }
}

// ---------------------------------------------------------------------------
// Subversion
// ---------------------------------------------------------------------------

pub struct SubversionConverter;

impl SubversionConverter {
    async fn tip(&self, workdir: &Path) -> Result<RevisionMarker> {
        let out = run_tool(
            "svn",
            ["info", "--show-item", "revision", path_str(workdir).as_str()],
            None,
        )
        .await
        .map_err(ImportError::SourceUnavailable)?;
        Ok(RevisionMarker(out.trim().to_string()))
    }
}

/// Parse the classic `svn log` output: an `rN | author | date | n lines`
/// header per entry, message lines following, entries separated by a dashed
/// rule. Entries arrive newest-first.
fn parse_svn_log(text: &str) -> Vec<Revision> {
    let mut revisions = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        if !line.starts_with('r') || !line.contains(" | ") {
            continue;
        }
        let parts: Vec<&str> = line.split(" | ").collect();
        if parts.len() < 4 {
            continue;
        }
        let id = parts[0].trim_start_matches('r').to_string();
        let author = parts[1].to_string();
        let timestamp = match parts[2]
            .get(..25)
            .and_then(|d| DateTime::parse_from_str(d, "%Y-%m-%d %H:%M:%S %z").ok())
        {
            Some(t) => t.with_timezone(&Utc),
            None => continue,
        };

        let mut message = Vec::new();
        for msg_line in lines.by_ref() {
            if msg_line.len() >= 10 && msg_line.chars().all(|c| c == '-') {
                break;
            }
            if !(message.is_empty() && msg_line.is_empty()) {
                message.push(msg_line);
            }
        }

        revisions.push(Revision {
            id,
            author,
            message: message.join("\n"),
            timestamp,
        });
    }
    revisions
}

#[async_trait]
impl VcsConverter for SubversionConverter {
    async fn checkout(&self, url: &str, workdir: &Path) -> Result<RevisionMarker> {
        run_tool(
            "svn",
            ["checkout", "--quiet", url, path_str(workdir).as_str()],
            None,
        )
        .await
        .map_err(ImportError::SourceUnavailable)?;
        self.tip(workdir).await
    }

    async fn update(&self, _url: &str, workdir: &Path) -> Result<RevisionMarker> {
        run_tool("svn", ["update", "--quiet", path_str(workdir).as_str()], None)
            .await
            .map_err(ImportError::SourceUnavailable)?;
        self.tip(workdir).await
    }

    async fn translate(
        &self,
        workdir: &Path,
        since: Option<&RevisionMarker>,
    ) -> Result<Vec<Revision>> {
        let out = run_tool("svn", ["log", path_str(workdir).as_str()], None)
            .await
            .map_err(ImportError::Conversion)?;

        let floor: u64 = match since {
            Some(marker) => marker.as_str().parse().map_err(|_| {
                ImportError::Conversion(format!("bad subversion marker: {}", marker))
            })?,
            None => 0,
        };

        let mut revisions: Vec<Revision> = parse_svn_log(&out)
            .into_iter()
            .filter(|r| r.id.parse::<u64>().map(|n| n > floor).unwrap_or(false))
            .collect();
        revisions.sort_by_key(|r| r.id.parse::<u64>().unwrap_or(0));
        Ok(revisions)
    }
}

// ---------------------------------------------------------------------------
// Bazaar
// ---------------------------------------------------------------------------

pub struct BazaarConverter;

impl BazaarConverter {
    async fn tip(&self, workdir: &Path) -> Result<RevisionMarker> {
        let out = run_tool("bzr", ["revno", path_str(workdir).as_str()], None)
            .await
            .map_err(ImportError::SourceUnavailable)?;
        Ok(RevisionMarker(out.trim().to_string()))
    }
}

/// Parse one `bzr log --line` entry: `revno: author date message`. The
/// author may span several tokens, so the date token anchors the split.
fn parse_bzr_log_line(line: &str) -> Option<Revision> {
    let (revno, rest) = line.split_once(':')?;
    let revno = revno.trim();
    if revno.is_empty() || !revno.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }

    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let date_idx = tokens
        .iter()
        .position(|t| NaiveDate::parse_from_str(t, "%Y-%m-%d").is_ok())?;
    let date = NaiveDate::parse_from_str(tokens[date_idx], "%Y-%m-%d").ok()?;
    let timestamp = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?);

    Some(Revision {
        id: revno.to_string(),
        author: tokens[..date_idx].join(" "),
        message: tokens[date_idx + 1..].join(" "),
        timestamp,
    })
}

#[async_trait]
impl VcsConverter for BazaarConverter {
    async fn checkout(&self, url: &str, workdir: &Path) -> Result<RevisionMarker> {
        run_tool("bzr", ["branch", "--quiet", url, path_str(workdir).as_str()], None)
            .await
            .map_err(ImportError::SourceUnavailable)?;
        self.tip(workdir).await
    }

    async fn update(&self, _url: &str, workdir: &Path) -> Result<RevisionMarker> {
        run_tool("bzr", ["pull", "--quiet"], Some(workdir))
            .await
            .map_err(ImportError::SourceUnavailable)?;
        self.tip(workdir).await
    }

    async fn translate(
        &self,
        workdir: &Path,
        since: Option<&RevisionMarker>,
    ) -> Result<Vec<Revision>> {
        let out = run_tool("bzr", ["log", "--line"], Some(workdir))
            .await
            .map_err(ImportError::Conversion)?;

        let floor: u64 = match since {
            Some(marker) => marker
                .as_str()
                .parse()
                .map_err(|_| ImportError::Conversion(format!("bad bazaar marker: {}", marker)))?,
            None => 0,
        };

        let mut revisions: Vec<Revision> = out
            .lines()
            .filter_map(parse_bzr_log_line)
            .filter(|r| r.id.parse::<u64>().map(|n| n > floor).unwrap_or(false))
            .collect();
        revisions.sort_by_key(|r| r.id.parse::<u64>().unwrap_or(0));
        Ok(revisions)
    }
}

// ---------------------------------------------------------------------------
// CVS
// ---------------------------------------------------------------------------

/// CVS has no tree-wide revision, so the marker is the sync time and
/// per-file revisions are translated individually. The source URL carries
/// the CVSROOT, optionally followed by `#module` (module defaults to `.`).
pub struct CvsConverter;

fn split_cvs_url(url: &str) -> (&str, &str) {
    match url.split_once('#') {
        Some((root, module)) if !module.is_empty() => (root, module),
        _ => (url, "."),
    }
}

fn parse_cvs_date(s: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y/%m/%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Parse `cvs log` output into one revision record per file revision.
/// Revision identity is `file:revision` since numbers repeat across files.
fn parse_cvs_log(text: &str) -> Vec<Revision> {
    let mut revisions = Vec::new();
    let mut current_file = String::new();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        if let Some(file) = line.strip_prefix("Working file: ") {
            current_file = file.trim().to_string();
            continue;
        }
        let Some(rev) = line.strip_prefix("revision ") else {
            continue;
        };
        let rev = rev.trim().to_string();

        let Some(meta) = lines.next() else { break };
        let mut timestamp = None;
        let mut author = String::new();
        for field in meta.split(';') {
            let field = field.trim();
            if let Some(date) = field.strip_prefix("date: ") {
                timestamp = parse_cvs_date(date.trim());
            } else if let Some(name) = field.strip_prefix("author: ") {
                author = name.trim().to_string();
            }
        }
        let Some(timestamp) = timestamp else { continue };

        let mut message = Vec::new();
        while let Some(peeked) = lines.peek() {
            let is_rule = peeked.len() >= 10
                && (peeked.chars().all(|c| c == '-') || peeked.chars().all(|c| c == '='));
            if is_rule || peeked.starts_with("revision ") {
                break;
            }
            message.push(*peeked);
            lines.next();
        }

        revisions.push(Revision {
            id: format!("{}:{}", current_file, rev),
            author,
            message: message.join("\n"),
            timestamp,
        });
    }
    revisions
}

#[async_trait]
impl VcsConverter for CvsConverter {
    async fn checkout(&self, url: &str, workdir: &Path) -> Result<RevisionMarker> {
        let (root, module) = split_cvs_url(url);
        let parent = workdir
            .parent()
            .ok_or_else(|| ImportError::SourceUnavailable("checkout path has no parent".into()))?;
        let name = workdir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ImportError::SourceUnavailable("bad checkout path".into()))?;
        run_tool(
            "cvs",
            ["-q", "-d", root, "checkout", "-P", "-d", name, module],
            Some(parent),
        )
        .await
        .map_err(ImportError::SourceUnavailable)?;
        Ok(RevisionMarker(Utc::now().to_rfc3339()))
    }

    async fn update(&self, _url: &str, workdir: &Path) -> Result<RevisionMarker> {
        run_tool("cvs", ["-q", "update", "-d", "-P"], Some(workdir))
            .await
            .map_err(ImportError::SourceUnavailable)?;
        Ok(RevisionMarker(Utc::now().to_rfc3339()))
    }

    async fn translate(
        &self,
        workdir: &Path,
        since: Option<&RevisionMarker>,
    ) -> Result<Vec<Revision>> {
        let out = run_tool("cvs", ["-q", "log", "-N"], Some(workdir))
            .await
            .map_err(ImportError::Conversion)?;

        let floor = match since {
            Some(marker) => Some(
                DateTime::parse_from_rfc3339(marker.as_str())
                    .map_err(|_| ImportError::Conversion(format!("bad cvs marker: {}", marker)))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        let mut revisions: Vec<Revision> = parse_cvs_log(&out)
            .into_iter()
            .filter(|r| floor.map(|f| r.timestamp > f).unwrap_or(true))
            .collect();
        revisions.sort_by_key(|r| r.timestamp);
        Ok(revisions)
    }
}
