//! Accept-Language Generation
//!
//! snapd localises error messages and store metadata according to the
//! request's `Accept-Language` header. The value is derived from the POSIX
//! locale environment the same way desktop toolkits do it.

/// Environment variables consulted for the locale, in priority order
const LOCALE_VARS: [&str; 3] = ["LC_ALL", "LC_MESSAGES", "LANG"];

/// Build the `Accept-Language` value from the process environment
#[must_use]
pub fn accept_languages() -> String {
    accept_languages_from(&language_names_from_env())
}

/// Read the preferred locale names from the environment
///
/// `LANGUAGE` (a colon-separated list) wins over the single-valued
/// `LC_ALL` / `LC_MESSAGES` / `LANG`.
#[must_use]
pub fn language_names_from_env() -> Vec<String> {
    let mut names: Vec<String> = std::env::var("LANGUAGE")
        .map(|v| {
            v.split(':')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if names.is_empty() {
        if let Some(value) = LOCALE_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|v| !v.is_empty())
        {
            names.push(value);
        }
    }

    names
}

/// Build the `Accept-Language` value for a list of POSIX locale names
///
/// Every name is expanded into its less specific variants
/// (`pt_BR.UTF-8` → `pt_BR`, `pt`), converted to RFC 2616 form and given a
/// descending quality value. Falls back to `en` when nothing usable remains.
#[must_use]
pub fn accept_languages_from(names: &[String]) -> String {
    let mut langs: Vec<String> = Vec::new();
    for name in names {
        for variant in expand_variants(name) {
            if let Some(lang) = posix_to_rfc2616(&variant) {
                if !langs.contains(&lang) {
                    langs.push(lang);
                }
            }
        }
    }

    if langs.is_empty() {
        return "en".to_string();
    }

    let delta = match langs.len() {
        0..=9 => 10,
        10..=19 => 5,
        _ => 1,
    };

    langs
        .iter()
        .enumerate()
        .map(|(i, lang)| {
            let quality = 100_i64 - i64::try_from(i).unwrap_or(i64::MAX / 2) * delta;
            with_quality(lang, quality)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `ll_CC.codeset@modifier` → [`ll_CC`, `ll`]
fn expand_variants(name: &str) -> Vec<String> {
    let base = name
        .split(['.', '@'])
        .next()
        .unwrap_or_default()
        .to_string();
    let mut variants = vec![base.clone()];
    if let Some((lang, _territory)) = base.split_once('_') {
        variants.push(lang.to_string());
    }
    variants
}

fn posix_to_rfc2616(language: &str) -> Option<String> {
    if language.is_empty() || language.contains(['.', '@']) {
        return None;
    }
    if language == "C" || language == "POSIX" {
        return None;
    }
    Some(language.to_ascii_lowercase().replace('_', "-"))
}

fn with_quality(lang: &str, quality: i64) -> String {
    if (0..100).contains(&quality) {
        if quality % 10 == 0 {
            format!("{lang};q=0.{}", quality / 10)
        } else {
            format!("{lang};q=0.{quality:02}")
        }
    } else {
        lang.to_string()
    }
}
