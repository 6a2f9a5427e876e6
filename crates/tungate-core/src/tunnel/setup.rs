// ── Profile preparation ──
//
// Rewrites directives newer VPN clients reject and makes sure the
// credential file the profile points at exists.

use std::path::Path;

use tracing::{debug, info};

use crate::error::CoreError;

/// Directives renamed by newer client releases: `(old, new)`.
/// Arguments are kept as-is.
const DIRECTIVE_RENAMES: &[(&str, &str)] = &[
    ("ns-cert-type", "remote-cert-tls"),
    ("ncp-ciphers", "data-ciphers"),
];

/// Rewrite deprecated directives. Returns `None` when nothing changed.
pub(crate) fn patch_directives(contents: &str) -> Option<String> {
    let mut changed = false;
    let mut patched: Vec<String> = Vec::new();
    for line in contents.lines() {
        let trimmed = line.trim_start();
        let directive = trimmed.split_whitespace().next().unwrap_or_default();
        match DIRECTIVE_RENAMES.iter().find(|(old, _)| *old == directive) {
            Some((old, new)) => {
                changed = true;
                patched.push(format!("{new}{}", &trimmed[old.len()..]));
            }
            None => patched.push(line.to_owned()),
        }
    }
    if !changed {
        return None;
    }
    let mut out = patched.join("\n");
    if contents.ends_with('\n') {
        out.push('\n');
    }
    Some(out)
}

/// Validate and patch the profile config at `config_path`, then create
/// an empty credential file at `credential_path` if there is none.
pub(crate) async fn prepare_profile(
    config_path: &Path,
    credential_path: &Path,
) -> Result<(), CoreError> {
    let contents = match tokio::fs::read_to_string(config_path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CoreError::Config {
                message: format!("profile config {} does not exist", config_path.display()),
            });
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(patched) = patch_directives(&contents) {
        tokio::fs::write(config_path, patched).await?;
        info!(path = %config_path.display(), "patched deprecated profile directives");
    }

    if !tokio::fs::try_exists(credential_path).await? {
        create_placeholder(credential_path).await?;
        debug!(path = %credential_path.display(), "created credential placeholder");
    }
    Ok(())
}

async fn create_placeholder(path: &Path) -> Result<(), CoreError> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    match options.open(path).await {
        Ok(_) => Ok(()),
        // Someone else created it between the check and the open.
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(CoreError::Config {
            message: format!("cannot create credential file {}: {e}", path.display()),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn deprecated_directives_are_renamed() {
        let input = "client\nns-cert-type server\n  ncp-ciphers AES-256-GCM\ndev tun\n";
        let patched = patch_directives(input).unwrap();
        assert_eq!(
            patched,
            "client\nremote-cert-tls server\ndata-ciphers AES-256-GCM\ndev tun\n"
        );
    }

    #[test]
    fn current_config_is_untouched() {
        assert!(patch_directives("client\nremote-cert-tls server\n").is_none());
        // A directive name that only shares a prefix is not renamed.
        assert!(patch_directives("ns-cert-type-extra x\n").is_none());
    }

    #[tokio::test]
    async fn prepare_requires_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = prepare_profile(&dir.path().join("x.ovpn"), &dir.path().join("x.password"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[tokio::test]
    async fn prepare_patches_and_creates_placeholder_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("abc.ovpn");
        let creds = dir.path().join("abc.password");
        std::fs::write(&config, "ns-cert-type server\n").unwrap();

        prepare_profile(&config, &creds).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&config).unwrap(),
            "remote-cert-tls server\n"
        );
        assert_eq!(std::fs::read_to_string(&creds).unwrap(), "");

        std::fs::write(&creds, "user\npass\n").unwrap();
        prepare_profile(&config, &creds).await.unwrap();
        assert_eq!(std::fs::read_to_string(&creds).unwrap(), "user\npass\n");
    }
}
