//! 配置文档的本地解析存储
//!
//! 配置中心下发的内容为 ini 风格文本：`[section]` 小节加 `key = value` 键值对。
//! 键查找大小写不敏感（统一小写存储），小节名大小写敏感；
//! 小节头之前的键归入固定的 `default` 小节。

use std::collections::HashMap;

use crate::error::{BeaconError, Result};

/// 默认小节名
pub const DEFAULT_SECTION: &str = "default";

/// 解析后的配置文档
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigStore {
    sections: HashMap<String, HashMap<String, String>>,
}

impl ConfigStore {
    /// 解析 ini 风格文本
    ///
    /// - `#` 和 `;` 开头的行为注释
    /// - 分隔符支持 `=` 和 `:`
    /// - 重复键后者覆盖前者
    /// - 无法识别的行视为格式错误
    pub fn parse(content: &str) -> Result<Self> {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current = DEFAULT_SECTION.to_string();

        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                let name = line[1..line.len() - 1].trim();
                if name.is_empty() {
                    return Err(BeaconError::config_parse(format!(
                        "empty section header at line {}",
                        lineno + 1
                    )));
                }
                current = name.to_string();
                sections.entry(current.clone()).or_default();
                continue;
            }

            let sep = line
                .char_indices()
                .find(|(_, c)| *c == '=' || *c == ':')
                .map(|(i, _)| i);
            let Some(sep) = sep else {
                return Err(BeaconError::config_parse(format!(
                    "expected `key = value` at line {}: {:?}",
                    lineno + 1,
                    raw
                )));
            };

            let key = line[..sep].trim().to_lowercase();
            if key.is_empty() {
                return Err(BeaconError::config_parse(format!(
                    "empty key at line {}",
                    lineno + 1
                )));
            }
            let value = line[sep + 1..].trim().to_string();

            sections.entry(current.clone()).or_default().insert(key, value);
        }

        Ok(Self { sections })
    }

    /// 查找某小节下的键，键大小写不敏感
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)?
            .get(&key.to_lowercase())
            .map(String::as_str)
    }

    /// 返回整个小节的键值对
    pub fn section(&self, name: &str) -> Option<&HashMap<String, String>> {
        self.sections.get(name)
    }

    /// 所有小节名
    pub fn section_names(&self) -> Vec<&str> {
        self.sections.keys().map(String::as_str).collect()
    }

    /// 是否为空文档
    pub fn is_empty(&self) -> bool {
        self.sections.values().all(HashMap::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# 顶层归入 default 小节
timeout = 30

[default]
db_host = 127.0.0.1
DB_PORT : 5432

[redis]
host = 10.0.0.9
port = 6379
; 注释行
port = 6380
"#;

    #[test]
    fn test_parse_sections_and_keys() {
        let store = ConfigStore::parse(SAMPLE).unwrap();
        assert_eq!(store.get(DEFAULT_SECTION, "timeout"), Some("30"));
        assert_eq!(store.get(DEFAULT_SECTION, "db_host"), Some("127.0.0.1"));
        assert_eq!(store.get("redis", "host"), Some("10.0.0.9"));
    }

    #[test]
    fn test_key_lookup_is_case_insensitive() {
        let store = ConfigStore::parse(SAMPLE).unwrap();
        assert_eq!(store.get(DEFAULT_SECTION, "DB_PORT"), Some("5432"));
        assert_eq!(store.get(DEFAULT_SECTION, "db_port"), Some("5432"));
        // 小节名大小写敏感
        assert_eq!(store.get("REDIS", "host"), None);
    }

    #[test]
    fn test_duplicate_key_last_wins() {
        let store = ConfigStore::parse(SAMPLE).unwrap();
        assert_eq!(store.get("redis", "port"), Some("6380"));
    }

    #[test]
    fn test_empty_and_comment_only() {
        assert!(ConfigStore::parse("").unwrap().is_empty());
        assert!(ConfigStore::parse("# only comments\n; here\n").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_line_is_error() {
        let err = ConfigStore::parse("[db]\nnot a pair\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));

        assert!(ConfigStore::parse("[]\n").is_err());
        assert!(ConfigStore::parse("= value\n").is_err());
    }

    #[test]
    fn test_section_view() {
        let store = ConfigStore::parse(SAMPLE).unwrap();
        let redis = store.section("redis").unwrap();
        assert_eq!(redis.len(), 2);
        assert!(store.section("missing").is_none());
    }
}
