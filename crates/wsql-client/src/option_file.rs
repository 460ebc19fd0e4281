//! MySQL option file (`my.cnf`) support.
//!
//! Only the subset a client needs is understood: `[group]` headers,
//! `key=value` and bare `key` lines, `#`/`;` comments and quoted values.
//! `!include` directives are skipped.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{ConnectOptions, parse_flag};
use crate::error::{Error, Result};

const CLIENT_GROUP: &str = "client";

const DEFAULT_LOCATIONS: &[&str] = &["/etc/my.cnf", "/etc/mysql/my.cnf"];

/// Fill unset fields of `options` from the configured option files.
pub(crate) fn resolve(options: &ConnectOptions) -> Result<ConnectOptions> {
    let mut resolved = options.clone();
    if !options.reads_option_files() {
        return Ok(resolved);
    }

    let mut groups = vec![CLIENT_GROUP];
    if let Some(group) = options.read_default_group.as_deref() {
        if group != CLIENT_GROUP {
            groups.push(group);
        }
    }

    let mut values = HashMap::new();
    match options.read_default_file.as_deref() {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|e| {
                Error::interface(format!("cannot read option file {}: {e}", path.display()))
            })?;
            parse_into(&text, &groups, &mut values);
        }
        None => {
            for path in default_locations() {
                if let Ok(text) = fs::read_to_string(&path) {
                    tracing::debug!(path = %path.display(), "reading option file");
                    parse_into(&text, &groups, &mut values);
                }
            }
        }
    }

    apply(&mut resolved, &values)?;
    Ok(resolved)
}

fn default_locations() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = DEFAULT_LOCATIONS.iter().map(PathBuf::from).collect();
    if let Some(home) = std::env::var_os("HOME") {
        paths.push(Path::new(&home).join(".my.cnf"));
    }
    paths
}

/// Collect the values of `groups` from `text`.
///
/// Keys are normalized to lowercase with `-` separators. Groups are read in
/// file order, so a later line overrides an earlier one.
fn parse_into(text: &str, groups: &[&str], values: &mut HashMap<String, String>) {
    let mut active = false;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('!') {
            tracing::debug!(directive = line, "skipping option file directive");
            continue;
        }
        if let Some(header) = line.strip_prefix('[') {
            let name = header.trim_end_matches(']').trim();
            active = groups.iter().any(|g| g.eq_ignore_ascii_case(name));
            continue;
        }
        if !active {
            continue;
        }

        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), unquote(value.trim())),
            None => (line, String::new()),
        };
        values.insert(key.to_ascii_lowercase().replace('_', "-"), value);
    }
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' || first == b'\'') && first == last {
            return value[1..value.len() - 1].to_string();
        }
    }
    // Unquoted values may carry a trailing comment.
    match value.find(" #") {
        Some(pos) => value[..pos].trim_end().to_string(),
        None => value.to_string(),
    }
}

fn apply(options: &mut ConnectOptions, values: &HashMap<String, String>) -> Result<()> {
    for (key, value) in values {
        match key.as_str() {
            "host" => fill(&mut options.host, || Ok(value.clone()))?,
            "user" => fill(&mut options.user, || Ok(value.clone()))?,
            "password" => fill(&mut options.password, || Ok(value.clone()))?,
            "database" => fill(&mut options.database, || Ok(value.clone()))?,
            "port" => fill(&mut options.port, || {
                value
                    .parse()
                    .map_err(|_| Error::interface(format!("invalid port in option file: {value}")))
            })?,
            "socket" => fill(&mut options.socket, || Ok(PathBuf::from(value)))?,
            "connect-timeout" => fill(&mut options.connect_timeout, || {
                value.parse().map(Duration::from_secs).map_err(|_| {
                    Error::interface(format!("invalid connect-timeout in option file: {value}"))
                })
            })?,
            "compress" => fill(&mut options.compress, || parse_flag(key, value))?,
            "init-command" => fill(&mut options.init_command, || Ok(value.clone()))?,
            "local-infile" => fill(&mut options.local_infile, || parse_flag(key, value))?,
            "default-character-set" => fill(&mut options.charset, || Ok(value.clone()))?,
            _ => {
                tracing::trace!(key = key.as_str(), "ignoring option file key");
            }
        }
    }
    Ok(())
}

fn fill<T>(slot: &mut Option<T>, value: impl FnOnce() -> Result<T>) -> Result<()> {
    if slot.is_none() {
        *slot = Some(value()?);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;

    fn option_file(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_untouched_without_files() {
        let options = ConnectOptions::new().host("db");
        assert_eq!(resolve(&options).unwrap(), options);
    }

    #[test]
    fn test_client_group() {
        let file = option_file(
            "# comment\n[mysqld]\nport=9999\n\n[client]\nhost = db.internal\nuser=app\npassword=\"s3 cret\"\nport=3310\nconnect_timeout=7\nlocal-infile\n",
        );
        let options = ConnectOptions::new().read_default_file(file.path());
        let resolved = resolve(&options).unwrap();
        assert_eq!(resolved.host.as_deref(), Some("db.internal"));
        assert_eq!(resolved.user.as_deref(), Some("app"));
        assert_eq!(resolved.password.as_deref(), Some("s3 cret"));
        assert_eq!(resolved.port, Some(3310));
        assert_eq!(resolved.connect_timeout, Some(Duration::from_secs(7)));
        assert_eq!(resolved.local_infile, Some(true));
    }

    #[test]
    fn test_named_group_overrides_client() {
        let file = option_file(
            "[client]\nuser=base\ndefault-character-set=latin1\n[reporting]\nuser=reporter\ninit_command=SET NAMES utf8mb4\n",
        );
        let options = ConnectOptions::new()
            .read_default_file(file.path())
            .read_default_group("reporting");
        let resolved = resolve(&options).unwrap();
        assert_eq!(resolved.user.as_deref(), Some("reporter"));
        assert_eq!(resolved.charset.as_deref(), Some("latin1"));
        assert_eq!(resolved.init_command.as_deref(), Some("SET NAMES utf8mb4"));
    }

    #[test]
    fn test_explicit_options_win() {
        let file = option_file("[client]\nuser=fromfile\ndatabase=filedb\ncompress=0\n");
        let options = ConnectOptions::new()
            .user("explicit")
            .read_default_file(file.path());
        let resolved = resolve(&options).unwrap();
        assert_eq!(resolved.user.as_deref(), Some("explicit"));
        assert_eq!(resolved.database.as_deref(), Some("filedb"));
        assert_eq!(resolved.compress, Some(false));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let options = ConnectOptions::new().read_default_file(dir.path().join("absent.cnf"));
        assert!(resolve(&options).is_err());
    }

    #[test]
    fn test_bad_port_is_an_error() {
        let file = option_file("[client]\nport=http\n");
        let options = ConnectOptions::new().read_default_file(file.path());
        assert!(resolve(&options).is_err());
    }

    #[test]
    fn test_unquote_strips_trailing_comment() {
        assert_eq!(unquote("value # note"), "value");
        assert_eq!(unquote("'a # b'"), "a # b");
        assert_eq!(unquote(""), "");
    }
}
