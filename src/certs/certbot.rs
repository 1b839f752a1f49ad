use std::path::Path;

use crate::certs::CertificateClient;
use crate::cmd;
use crate::config::StackConfig;
use crate::emit::paths;
use crate::error::{ProvisionError, ProvisionResult};

const CONTAINER_WEBROOT: &str = "/var/www/certbot";

/// Runs certbot from its container image in webroot mode. Challenge
/// files land in the directory nginx serves the ACME location from.
pub struct Certbot {
    image: String,
}

impl Certbot {
    #[must_use]
    pub fn new(stack: &StackConfig) -> Self {
        Self {
            image: stack.certbot_image.clone(),
        }
    }

    /// Arguments for `docker` with the mount sources resolved under `root`.
    #[must_use]
    pub fn args(&self, domain: &str, email: &str, root: &Path) -> Vec<String> {
        let conf = root.join(paths::LETSENCRYPT);
        let webroot = root.join(paths::CHALLENGE_WEBROOT);
        [
            "run",
            "--rm",
            "-v",
            format!("{}:/etc/letsencrypt", conf.display()).as_str(),
            "-v",
            format!("{}:{CONTAINER_WEBROOT}", webroot.display()).as_str(),
            self.image.as_str(),
            "certonly",
            "--webroot",
            "-w",
            CONTAINER_WEBROOT,
            "-d",
            domain,
            "-m",
            email,
            "--agree-tos",
            "--no-eff-email",
            "--non-interactive",
            "--keep-until-expiring",
        ]
        .iter()
        .map(ToString::to_string)
        .collect()
    }
}

impl CertificateClient for Certbot {
    fn check_prerequisites(&self) -> ProvisionResult<()> {
        if !cmd::command_exists("docker") {
            return Err(ProvisionError::PrerequisiteMissing(
                "docker not found; certbot runs as a container".into(),
            ));
        }
        Ok(())
    }

    fn obtain(&self, domain: &str, email: &str, root: &Path) -> ProvisionResult<()> {
        // Bind mounts need absolute sources.
        let root = root.canonicalize()?;
        let args = self.args(domain, email, &root);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        eprintln!("Requesting certificate for {domain}...");
        cmd::run_interactive(None, "docker", &args).map_err(|e| ProvisionError::Certificate {
            domain: domain.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_mount_webroot_and_letsencrypt() {
        let certbot = Certbot::new(&StackConfig::default());
        let args = certbot.args("example.com", "ops@example.com", Path::new("/srv/site"));

        assert!(args.contains(&"/srv/site/certbot/conf:/etc/letsencrypt".to_string()));
        assert!(args.contains(&"/srv/site/certbot/www:/var/www/certbot".to_string()));
        assert!(args.contains(&"certbot/certbot:latest".to_string()));

        let d = args.iter().position(|a| a == "-d").unwrap();
        assert_eq!(args[d + 1], "example.com");
        let m = args.iter().position(|a| a == "-m").unwrap();
        assert_eq!(args[m + 1], "ops@example.com");
    }
}
