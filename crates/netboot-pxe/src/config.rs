//! PXELINUX config discovery and parsing
//!
//! Given the working directory derived from a lease's boot URI, probe
//! the standard `pxelinux.cfg/` names (MAC first, then the uppercase
//! hex IP progressively truncated, then `default`) and parse the
//! syslinux subset we boot from: `default`, `label`, `kernel`/`linux`,
//! `append` and `initrd`.

use crate::entry::BootEntry;
use crate::error::{PxeError, Result};
use crate::fetch::Fetcher;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};
use url::Url;

/// Parsed boot configuration for one boot attempt
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory all relative resource paths resolve against
    working_dir: Url,
    /// Label name to entry
    pub entries: HashMap<String, BootEntry>,
    /// Name of the entry to boot by default
    pub default_entry: Option<String>,
}

impl Config {
    /// Create an empty config anchored at `working_dir`.
    /// The path is normalized to end in `/` so joins stay relative.
    pub fn new(mut working_dir: Url) -> Self {
        if !working_dir.path().ends_with('/') {
            let path = format!("{}/", working_dir.path());
            working_dir.set_path(&path);
        }
        Self {
            working_dir,
            entries: HashMap::new(),
            default_entry: None,
        }
    }

    /// Probe `pxelinux.cfg/` for this machine's config file and parse
    /// the first one that fetches. `ip` is only meaningful for v4
    /// leases; without one the IP-derived names are skipped.
    pub async fn find_config_file(
        &mut self,
        fetcher: &dyn Fetcher,
        mac: &str,
        ip: Option<Ipv4Addr>,
    ) -> Result<()> {
        for name in candidate_names(mac, ip) {
            let path = format!("pxelinux.cfg/{}", name);
            let url = self
                .working_dir
                .join(&path)
                .map_err(|e| PxeError::InvalidUrl(e.to_string()))?;

            match fetcher.fetch(&url).await {
                Ok(body) => {
                    info!(url = %url, "found PXE config");
                    let text = String::from_utf8_lossy(&body);
                    return self.parse(&text);
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "config candidate not available");
                }
            }
        }

        Err(PxeError::ConfigNotFound {
            dir: self.working_dir.to_string(),
        })
    }

    /// Parse a PXELINUX config body into entries
    pub fn parse(&mut self, text: &str) -> Result<()> {
        let mut current: Option<(String, PartialEntry)> = None;

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (directive, rest) = match line.split_once(char::is_whitespace) {
                Some((d, r)) => (d.to_ascii_lowercase(), r.trim()),
                None => (line.to_ascii_lowercase(), ""),
            };

            match directive.as_str() {
                "default" => {
                    self.default_entry = Some(rest.to_string());
                }
                "label" => {
                    if let Some((name, partial)) = current.take() {
                        self.finish_entry(name, partial);
                    }
                    current = Some((rest.to_string(), PartialEntry::default()));
                }
                "kernel" | "linux" => {
                    if let Some((_, ref mut partial)) = current {
                        partial.kernel = Some(rest.to_string());
                    }
                }
                "initrd" => {
                    if let Some((_, ref mut partial)) = current {
                        partial.initrd = Some(rest.to_string());
                    }
                }
                "append" => {
                    if let Some((_, ref mut partial)) = current {
                        partial.append = Some(rest.to_string());
                    }
                }
                // Menu decoration and other directives are tolerated
                _ => {}
            }
        }

        if let Some((name, partial)) = current.take() {
            self.finish_entry(name, partial);
        }

        Ok(())
    }

    fn finish_entry(&mut self, name: String, partial: PartialEntry) {
        match partial.build(&name, &self.working_dir) {
            Ok(entry) => {
                self.entries.insert(name, entry);
            }
            Err(e) => {
                warn!(label = %name, error = %e, "skipping unusable label");
            }
        }
    }

    /// The entry named by the config's default pointer.
    /// A missing pointer or a dangling name is an error; PXELINUX
    /// itself would fall back to interactive selection, which a
    /// headless boot cannot do.
    pub fn default_boot_entry(&self) -> Result<&BootEntry> {
        let name = self
            .default_entry
            .as_deref()
            .ok_or(PxeError::MissingDefault)?;
        self.entries
            .get(name)
            .ok_or_else(|| PxeError::NoDefaultEntry(name.to_string()))
    }
}

#[derive(Debug, Default)]
struct PartialEntry {
    kernel: Option<String>,
    initrd: Option<String>,
    append: Option<String>,
}

impl PartialEntry {
    fn build(self, name: &str, working_dir: &Url) -> Result<BootEntry> {
        let kernel = self
            .kernel
            .ok_or_else(|| PxeError::Parse(format!("label {} has no kernel", name)))?;
        let kernel = resolve(working_dir, &kernel)?;

        // initrd can come from its own directive or an initrd= token
        // in append; the token is stripped from the command line
        let mut cmdline_parts: Vec<&str> = Vec::new();
        let mut initrd = self.initrd;
        if let Some(ref append) = self.append {
            for part in append.split_whitespace() {
                if let Some(value) = part.strip_prefix("initrd=") {
                    if initrd.is_none() {
                        initrd = Some(value.to_string());
                    }
                } else {
                    cmdline_parts.push(part);
                }
            }
        }
        let initrd = match initrd {
            Some(path) => Some(resolve(working_dir, &path)?),
            None => None,
        };

        Ok(BootEntry {
            name: name.to_string(),
            kernel,
            initrd,
            cmdline: cmdline_parts.join(" "),
        })
    }
}

/// Resolve a config-relative path (absolute URLs pass through)
fn resolve(working_dir: &Url, path: &str) -> Result<Url> {
    if path.contains("://") {
        return Url::parse(path).map_err(|e| PxeError::InvalidUrl(e.to_string()));
    }
    working_dir
        .join(path.trim_start_matches('/'))
        .map_err(|e| PxeError::InvalidUrl(e.to_string()))
}

/// Candidate config file names in PXELINUX probe order
fn candidate_names(mac: &str, ip: Option<Ipv4Addr>) -> Vec<String> {
    let mut names = Vec::new();

    // 01- prefix is the ARP hardware type for ethernet
    names.push(format!("01-{}", mac.to_lowercase().replace(':', "-")));

    if let Some(ip) = ip {
        let octets = ip.octets();
        let hex = format!(
            "{:02X}{:02X}{:02X}{:02X}",
            octets[0], octets[1], octets[2], octets[3]
        );
        for len in (1..=8).rev() {
            names.push(hex[..len].to_string());
        }
    }

    names.push("default".to_string());
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap as Map;
    use std::sync::Mutex;

    /// Fetcher serving from an in-memory map, recording every URL asked
    struct MapFetcher {
        files: Map<String, Vec<u8>>,
        requests: Mutex<Vec<String>>,
    }

    impl MapFetcher {
        fn new(files: &[(&str, &str)]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                    .collect(),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requested(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetcher for MapFetcher {
        async fn fetch(&self, url: &Url) -> Result<Bytes> {
            self.requests.lock().unwrap().push(url.to_string());
            self.files
                .get(url.as_str())
                .map(|body| Bytes::copy_from_slice(body))
                .ok_or_else(|| PxeError::ConfigNotFound {
                    dir: url.to_string(),
                })
        }
    }

    const SAMPLE: &str = "\
# comment
DEFAULT install

LABEL install
  KERNEL vmlinuz
  APPEND console=ttyS0 initrd=initrd.img root=/dev/ram0

LABEL rescue
  LINUX rescue/vmlinuz
  INITRD rescue/initrd.img
  APPEND single
";

    fn wd() -> Url {
        Url::parse("tftp://192.168.0.2/boot/").unwrap()
    }

    #[test]
    fn test_parse_sample() {
        let mut config = Config::new(wd());
        config.parse(SAMPLE).unwrap();

        assert_eq!(config.default_entry.as_deref(), Some("install"));
        assert_eq!(config.entries.len(), 2);

        let install = &config.entries["install"];
        assert_eq!(
            install.kernel.as_str(),
            "tftp://192.168.0.2/boot/vmlinuz"
        );
        assert_eq!(
            install.initrd.as_ref().unwrap().as_str(),
            "tftp://192.168.0.2/boot/initrd.img"
        );
        // initrd= token stripped from the command line
        assert_eq!(install.cmdline, "console=ttyS0 root=/dev/ram0");

        let rescue = &config.entries["rescue"];
        assert_eq!(
            rescue.kernel.as_str(),
            "tftp://192.168.0.2/boot/rescue/vmlinuz"
        );
        assert_eq!(rescue.cmdline, "single");
    }

    #[test]
    fn test_parse_absolute_kernel_url() {
        let mut config = Config::new(wd());
        config
            .parse("default x\nlabel x\nkernel http://mirror/vmlinuz\n")
            .unwrap();
        assert_eq!(
            config.entries["x"].kernel.as_str(),
            "http://mirror/vmlinuz"
        );
    }

    #[test]
    fn test_label_without_kernel_skipped() {
        let mut config = Config::new(wd());
        config
            .parse("default broken\nlabel broken\nappend quiet\n")
            .unwrap();
        assert!(config.entries.is_empty());
        assert!(matches!(
            config.default_boot_entry(),
            Err(PxeError::NoDefaultEntry(_))
        ));
    }

    #[test]
    fn test_default_boot_entry_selection() {
        let mut config = Config::new(wd());
        config.parse(SAMPLE).unwrap();
        assert_eq!(config.default_boot_entry().unwrap().name, "install");

        config.default_entry = None;
        assert!(matches!(
            config.default_boot_entry(),
            Err(PxeError::MissingDefault)
        ));
    }

    #[test]
    fn test_candidate_names_order() {
        let names = candidate_names(
            "52:54:00:aa:bb:cc",
            Some(Ipv4Addr::new(192, 168, 0, 10)),
        );

        assert_eq!(names[0], "01-52-54-00-aa-bb-cc");
        assert_eq!(names[1], "C0A8000A");
        assert_eq!(names[2], "C0A8000");
        assert_eq!(names[8], "C");
        assert_eq!(names.last().unwrap(), "default");
        assert_eq!(names.len(), 10);
    }

    #[test]
    fn test_candidate_names_without_ip() {
        let names = candidate_names("52:54:00:aa:bb:cc", None);
        assert_eq!(names, vec!["01-52-54-00-aa-bb-cc", "default"]);
    }

    #[tokio::test]
    async fn test_find_config_file_probe_order() {
        let fetcher = MapFetcher::new(&[(
            "tftp://192.168.0.2/boot/pxelinux.cfg/default",
            SAMPLE,
        )]);

        let mut config = Config::new(wd());
        config
            .find_config_file(
                &fetcher,
                "52:54:00:aa:bb:cc",
                Some(Ipv4Addr::new(192, 168, 0, 10)),
            )
            .await
            .unwrap();

        // Every more-specific candidate was probed before default
        let requested = fetcher.requested();
        assert_eq!(requested.len(), 10);
        assert_eq!(
            requested[0],
            "tftp://192.168.0.2/boot/pxelinux.cfg/01-52-54-00-aa-bb-cc"
        );
        assert_eq!(
            requested.last().unwrap(),
            "tftp://192.168.0.2/boot/pxelinux.cfg/default"
        );
        assert_eq!(config.default_boot_entry().unwrap().name, "install");
    }

    #[tokio::test]
    async fn test_find_config_file_mac_match_stops_probing() {
        let fetcher = MapFetcher::new(&[(
            "tftp://192.168.0.2/boot/pxelinux.cfg/01-52-54-00-aa-bb-cc",
            SAMPLE,
        )]);

        let mut config = Config::new(wd());
        config
            .find_config_file(
                &fetcher,
                "52:54:00:aa:bb:cc",
                Some(Ipv4Addr::new(192, 168, 0, 10)),
            )
            .await
            .unwrap();

        assert_eq!(fetcher.requested().len(), 1);
    }

    #[tokio::test]
    async fn test_find_config_file_none_available() {
        let fetcher = MapFetcher::new(&[]);
        let mut config = Config::new(wd());
        let result = config
            .find_config_file(&fetcher, "52:54:00:aa:bb:cc", None)
            .await;
        assert!(matches!(result, Err(PxeError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_working_dir_normalized_with_trailing_slash() {
        let config = Config::new(Url::parse("tftp://10.0.0.1/boot").unwrap());
        assert_eq!(config.working_dir.path(), "/boot/");
    }
}
