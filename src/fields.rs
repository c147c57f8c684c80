//! StorageGRID field extraction from node log directories.
//!
//! Every value that can be pulled from a directory tree has a sentinel meaning
//! "not found". A child directory's fields fall back to its parent's through
//! [`NodeFields::inherit_missing_from`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use regex::Regex;
use tracing::warn;

use crate::error::Result;
use crate::paths::Entry;

/// Marker file that identifies a node ("lumberjack") directory.
pub const LUMBERJACK_MARKER: &str = "lumberjack.log";

const SG_RELEASE: &str = "storage-grid-release-";

/// Category name and pattern, in the order they are tried.
const CATEGORIES: [(&str, &str); 21] = [
    ("audit", r".*audit.*"),
    ("base_os_commands", r".*base[/_-]*os[/_-]*.*command.*"),
    ("bycast", r".*bycast.*"),
    ("cassandra_commands", r".*cassandra[/_-]*command.*"),
    ("cassandra_gc", r".*cassandra[/_-]*gc.*"),
    ("cassandra_system", r".*cassandra[/_-]*system.*"),
    ("dmesg", r".*dmesg.*"),
    ("gdu_server", r".*gdu[/_-]*server.*"),
    ("init_sg", r".*init[/_-]*sg.*"),
    ("install", r".*install.*"),
    ("kern", r".*kern.*"),
    ("messages", r".*messages.*"),
    ("pge_image_updater", r".*pge[/_-]*image[/_-]*updater.*"),
    ("pge_mgmt_api", r".*pge[/_-]*mgmt[/_-]*api.*"),
    ("server_manager", r".*server[/_-]*manager.*"),
    ("sg_fw_update", r".*sg[/_-]*fw[/_-]*update.*"),
    ("storagegrid_node", r".*storagegrid.*node.*"),
    ("storagegrid_daemon", r".*storagegrid.*daemon.*"),
    ("syslog", r".*syslog.*"),
    ("system_commands", r".*system[/_-]*commands.*"),
    ("upgrade", r".*upgrade.*"),
];

const HV_ENV_TO_PLATFORM: [(&str, &str); 2] = [("vSphere", "vSphere"), ("SGA", "SGA")];

/// Extensions accepted outside node directories.
const VALID_LOG_EXTENSIONS: [&str; 2] = [".txt", ".log"];

/// Extension-less names accepted outside node directories.
const VALID_LOG_FILENAMES: [&str; 3] = ["syslog", "messages", "system_commands"];

/// Compiled classification tables. Built once at start-up and shared by
/// reference with every worker.
#[derive(Debug, Clone)]
pub struct FieldRules {
    categories: Vec<(&'static str, Regex)>,
    platforms: HashMap<&'static str, &'static str>,
    case_number: Regex,
    time_span: Regex,
}

impl FieldRules {
    pub fn new() -> Result<Self> {
        let categories = CATEGORIES
            .iter()
            .map(|(name, pattern)| -> Result<(&'static str, Regex)> {
                Ok((*name, Regex::new(pattern)?))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            categories,
            platforms: HV_ENV_TO_PLATFORM.into_iter().collect(),
            case_number: Regex::new(r"^\d{10}$")?,
            time_span: Regex::new(r"^\d+-\d+$")?,
        })
    }

    /// Classifies a path by testing ever wider trailing windows of it (file
    /// name, then parent/file name, and so on) against the category table.
    /// The first category that matches the narrowest window wins.
    pub fn get_category(&self, path: &str) -> String {
        let normalized = path.replace('\\', "/");
        let parts: Vec<&str> = normalized.split('/').collect();

        for start in (0..parts.len()).rev() {
            let window = parts[start..].join("/");
            if let Some((name, _)) = self
                .categories
                .iter()
                .find(|(_, regex)| regex.is_match(&window))
            {
                return name.to_string();
            }
        }
        NodeFields::MISSING_CATEGORY.to_string()
    }

    /// The directory's base name if it is exactly ten digits.
    pub fn get_case_number(&self, dir: &Path) -> String {
        let basename = base_name(dir);
        if self.case_number.is_match(&basename) {
            basename
        } else {
            NodeFields::MISSING_CASE_NUM.to_string()
        }
    }

    pub fn is_case_number(&self, name: &str) -> bool {
        self.case_number.is_match(name)
    }

    /// `(major, minor)` from the first `storage-grid-release-` line of the
    /// directory's `system_commands` file. Never fails.
    pub fn get_storage_grid_version(&self, lumber_dir: &Path) -> (i32, i32) {
        let sys_file = lumber_dir.join("system_commands");
        if !sys_file.is_file() {
            return NodeFields::MISSING_SG_VER;
        }

        let file = match File::open(&sys_file) {
            Ok(file) => file,
            Err(e) => {
                warn!("Error while parsing storagegrid version: {}", e);
                return NodeFields::MISSING_SG_VER;
            }
        };

        for line in BufReader::new(file).split(b'\n') {
            let line = match line {
                Ok(line) => String::from_utf8_lossy(&line).into_owned(),
                Err(e) => {
                    warn!("Error while parsing storagegrid version: {}", e);
                    return NodeFields::MISSING_SG_VER;
                }
            };
            if let Some(version) = line.split(SG_RELEASE).nth(1) {
                return parse_major_minor(version).unwrap_or_else(|| {
                    warn!("Error while parsing storagegrid version: {:?}", version);
                    NodeFields::MISSING_SG_VER
                });
            }
        }
        NodeFields::MISSING_SG_VER
    }

    /// Hypervisor platform declared in `os/etc/user_data`, if it is one we know.
    pub fn get_platform(&self, lumber_dir: &Path) -> String {
        let user_data = lumber_dir.join("os").join("etc").join("user_data");
        let Ok(file) = File::open(&user_data) else {
            return NodeFields::MISSING_PLATFORM.to_string();
        };

        for line in BufReader::new(file).split(b'\n').map_while(|l| l.ok()) {
            let line = String::from_utf8_lossy(&line);
            if !(line.contains("HV_ENV") && line.contains('=')) {
                continue;
            }
            let value = line
                .split('=')
                .nth(1)
                .unwrap_or_default()
                .trim_matches(|c| matches!(c, '\n' | '\r' | '"' | '\'' | ';' | ' '));
            match self.platforms.get(value) {
                Some(platform) => return platform.to_string(),
                None => warn!("Unknown Platform: {}", value),
            }
        }
        NodeFields::MISSING_PLATFORM.to_string()
    }

    pub fn get_time_span(&self, lumber_dir: &Path) -> String {
        let basename = base_name(lumber_dir);
        if self.time_span.is_match(&basename) {
            basename
        } else {
            NodeFields::MISSING_TIME_SPAN.to_string()
        }
    }

    /// Decides whether a file is StorageGRID material worth indexing.
    ///
    /// A relative path mentioning "bycast" is enough on its own. Otherwise the
    /// file needs a log extension or a known log name, and outside a node
    /// directory its contents must also mention "bycast".
    pub fn is_storagegrid(&self, fields: &NodeFields, entry: &Entry) -> bool {
        if entry.rel_str().contains("bycast") {
            return true;
        }

        let valid_ext = VALID_LOG_EXTENSIONS.contains(&entry.extension().as_str());
        let valid_name = VALID_LOG_FILENAMES.contains(&entry.filename().as_str());
        if !(valid_ext || valid_name) {
            return false;
        }

        if fields.node_name != NodeFields::MISSING_NODE_NAME {
            true
        } else {
            contains_bycast(&entry.abspath())
        }
    }
}

pub fn get_node_name(lumber_dir: &Path) -> String {
    lumber_dir
        .parent()
        .map(base_name)
        .unwrap_or_default()
}

pub fn get_grid_id(lumber_dir: &Path) -> String {
    lumber_dir
        .parent()
        .and_then(Path::parent)
        .map(base_name)
        .unwrap_or_default()
}

/// True if "bycast" appears in the path or, for files, anywhere in the contents.
pub fn contains_bycast(path: &Path) -> bool {
    if path.to_string_lossy().contains("bycast") {
        return true;
    }
    if !path.is_file() {
        return false;
    }

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            warn!("Error during \"bycast\" search: {}", e);
            return false;
        }
    };
    for line in BufReader::new(file).split(b'\n') {
        match line {
            Ok(line) if line.windows(6).any(|w| w == b"bycast") => return true,
            Ok(_) => {}
            Err(e) => {
                warn!("Error during \"bycast\" search: {}", e);
                return false;
            }
        }
    }
    false
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn parse_major_minor(version: &str) -> Option<(i32, i32)> {
    let mut parts = version.split('.');
    let major = parts.next()?.trim().parse().ok()?;
    let minor = parts.next()?.trim().parse().ok()?;
    Some((major, minor))
}

/// Fields describing the node a log file came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFields {
    pub case_num: String,
    pub sg_version: (i32, i32),
    pub platform: String,
    pub category: String,
    pub time_span: String,
    pub node_name: String,
    pub grid_id: String,
}

impl Default for NodeFields {
    fn default() -> Self {
        Self {
            case_num: Self::MISSING_CASE_NUM.to_string(),
            sg_version: Self::MISSING_SG_VER,
            platform: Self::MISSING_PLATFORM.to_string(),
            category: Self::MISSING_CATEGORY.to_string(),
            time_span: Self::MISSING_TIME_SPAN.to_string(),
            node_name: Self::MISSING_NODE_NAME.to_string(),
            grid_id: Self::MISSING_GRID_ID.to_string(),
        }
    }
}

impl NodeFields {
    pub const MISSING_CASE_NUM: &'static str = "Unknown";
    pub const MISSING_SG_VER: (i32, i32) = (-1, -1);
    pub const MISSING_PLATFORM: &'static str = "Unknown";
    pub const MISSING_CATEGORY: &'static str = "other";
    pub const MISSING_TIME_SPAN: &'static str = "Unknown-Unknown";
    pub const MISSING_NODE_NAME: &'static str = "Unknown";
    pub const MISSING_GRID_ID: &'static str = "Unknown";

    /// Fields carrying only a case number.
    pub fn for_case(case_num: impl Into<String>) -> Self {
        Self {
            case_num: case_num.into(),
            ..Self::default()
        }
    }

    /// Reads every field a node directory can supply. The case number is
    /// never found here and stays missing.
    ///
    /// # Panics
    ///
    /// Panics if `lumber_dir` does not contain the lumberjack marker file.
    pub fn from_lumberjack_dir(rules: &FieldRules, lumber_dir: &Path) -> Self {
        assert!(
            is_lumberjack_dir(lumber_dir),
            "Not a lumberjack directory: {}",
            lumber_dir.display()
        );
        Self {
            case_num: Self::MISSING_CASE_NUM.to_string(),
            sg_version: rules.get_storage_grid_version(lumber_dir),
            platform: rules.get_platform(lumber_dir),
            category: rules.get_category(&lumber_dir.to_string_lossy()),
            time_span: rules.get_time_span(lumber_dir),
            node_name: get_node_name(lumber_dir),
            grid_id: get_grid_id(lumber_dir),
        }
    }

    /// Returns a copy where every missing field is taken from `parent`.
    pub fn inherit_missing_from(&self, parent: &NodeFields) -> NodeFields {
        fn pick(own: &str, missing: &str, parent: &str) -> String {
            (if own == missing { parent } else { own }).to_string()
        }

        NodeFields {
            case_num: pick(&self.case_num, Self::MISSING_CASE_NUM, &parent.case_num),
            sg_version: if self.sg_version == Self::MISSING_SG_VER {
                parent.sg_version
            } else {
                self.sg_version
            },
            platform: pick(&self.platform, Self::MISSING_PLATFORM, &parent.platform),
            category: pick(&self.category, Self::MISSING_CATEGORY, &parent.category),
            time_span: pick(&self.time_span, Self::MISSING_TIME_SPAN, &parent.time_span),
            node_name: pick(&self.node_name, Self::MISSING_NODE_NAME, &parent.node_name),
            grid_id: pick(&self.grid_id, Self::MISSING_GRID_ID, &parent.grid_id),
        }
    }
}

pub fn is_lumberjack_dir(dir: &Path) -> bool {
    dir.join(LUMBERJACK_MARKER).is_file()
}

/// Fields of a node directory with gaps filled from `inherit_from`.
pub fn extract_fields(rules: &FieldRules, lumber_dir: &Path, inherit_from: &NodeFields) -> NodeFields {
    NodeFields::from_lumberjack_dir(rules, lumber_dir).inherit_missing_from(inherit_from)
}
