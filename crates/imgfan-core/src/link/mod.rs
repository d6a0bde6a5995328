//! Link generation and inversion.
//!
//! Deterministic, invertible transform from a raw backend URL to the link
//! actually shown/copied to the user. The only rewriting performed is
//! proxy-prefixing for the one distinguished proxied service; every other
//! URL passes through untouched.
//!
//! Hard invariant: `original_link(generate(u)) == u` for every configured
//! prefix. No I/O, no failure mode beyond "no match, return input".

use serde::{Deserialize, Serialize};

use crate::domain::ServiceId;

/// Which form of link the user wants to copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkOutputMode {
    /// The raw backend URL.
    Direct,
    /// The proxy-prefixed URL, for the proxied service only.
    Proxied,
}

/// Everything the generator needs, extracted from live settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkConfig {
    /// The one service whose links are proxy-rewritten.
    pub proxied_service: ServiceId,
    /// Selected output mode.
    pub output_mode: LinkOutputMode,
    /// The prefix applied when generating.
    pub active_prefix: String,
    /// Every prefix ever configured; inversion checks all of them, not
    /// just the active one.
    pub known_prefixes: Vec<String>,
}

/// Produce the displayed link for a raw backend URL.
///
/// Prefixes if and only if the result came from the proxied service, the
/// output mode selects proxying, and a non-empty active prefix exists.
#[must_use]
pub fn generate(raw_url: &str, service: &ServiceId, config: &LinkConfig) -> String {
    if service == &config.proxied_service
        && config.output_mode == LinkOutputMode::Proxied
        && !config.active_prefix.is_empty()
    {
        format!("{}{raw_url}", config.active_prefix)
    } else {
        raw_url.to_string()
    }
}

/// Strip the proxy prefix from a displayed link.
///
/// Checks the full configured prefix list and strips the longest match, so
/// links generated under a previously active prefix still invert. Returns
/// the input unchanged when nothing matches.
#[must_use]
pub fn original_link(displayed: &str, config: &LinkConfig) -> String {
    let mut best: Option<&str> = None;
    for prefix in &config.known_prefixes {
        if !prefix.is_empty()
            && displayed.starts_with(prefix.as_str())
            && best.is_none_or(|b| prefix.len() > b.len())
        {
            best = Some(prefix);
        }
    }
    match best {
        Some(prefix) => displayed[prefix.len()..].to_string(),
        None => displayed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LinkConfig {
        LinkConfig {
            proxied_service: ServiceId::new("weibo"),
            output_mode: LinkOutputMode::Proxied,
            active_prefix: "https://proxy.example.com/?u=".to_string(),
            known_prefixes: vec![
                "https://proxy.example.com/?u=".to_string(),
                "https://mirror.example.org/".to_string(),
            ],
        }
    }

    #[test]
    fn test_generate_prefixes_proxied_service() {
        let link = generate("https://wx1.sinaimg.cn/a.jpg", &ServiceId::new("weibo"), &config());
        assert_eq!(link, "https://proxy.example.com/?u=https://wx1.sinaimg.cn/a.jpg");
    }

    #[test]
    fn test_generate_leaves_other_services_alone() {
        let link = generate("https://cdn.example.com/a.jpg", &ServiceId::new("r2"), &config());
        assert_eq!(link, "https://cdn.example.com/a.jpg");
    }

    #[test]
    fn test_generate_respects_direct_mode() {
        let mut cfg = config();
        cfg.output_mode = LinkOutputMode::Direct;
        let link = generate("https://wx1.sinaimg.cn/a.jpg", &ServiceId::new("weibo"), &cfg);
        assert_eq!(link, "https://wx1.sinaimg.cn/a.jpg");
    }

    #[test]
    fn test_generate_with_empty_prefix_is_identity() {
        let mut cfg = config();
        cfg.active_prefix = String::new();
        let link = generate("https://wx1.sinaimg.cn/a.jpg", &ServiceId::new("weibo"), &cfg);
        assert_eq!(link, "https://wx1.sinaimg.cn/a.jpg");
    }

    #[test]
    fn test_round_trip_for_every_known_prefix() {
        let raw = "https://wx1.sinaimg.cn/large/photo.png";
        let mut cfg = config();
        for prefix in cfg.known_prefixes.clone() {
            cfg.active_prefix = prefix;
            let displayed = generate(raw, &ServiceId::new("weibo"), &cfg);
            assert_eq!(original_link(&displayed, &cfg), raw);
        }
    }

    #[test]
    fn test_inversion_strips_inactive_prefix_too() {
        let cfg = config();
        let displayed = "https://mirror.example.org/https://wx1.sinaimg.cn/a.jpg";
        assert_eq!(original_link(displayed, &cfg), "https://wx1.sinaimg.cn/a.jpg");
    }

    #[test]
    fn test_inversion_strips_longest_match() {
        let mut cfg = config();
        cfg.known_prefixes = vec![
            "https://p.example.com/".to_string(),
            "https://p.example.com/deep/".to_string(),
        ];
        let displayed = "https://p.example.com/deep/https://x/a.jpg";
        assert_eq!(original_link(displayed, &cfg), "https://x/a.jpg");
    }

    #[test]
    fn test_inversion_without_match_returns_input() {
        let cfg = config();
        assert_eq!(
            original_link("https://unrelated.example.com/a.jpg", &cfg),
            "https://unrelated.example.com/a.jpg"
        );
    }
}
