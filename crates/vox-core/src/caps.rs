use std::collections::BTreeMap;

/// Default attributes assumed for raw audio when the client omits them.
const DEFAULT_ATTRIBUTES: [(&str, &str); 4] = [
    ("rate", "16000"),
    ("format", "S16LE"),
    ("channels", "1"),
    ("layout", "interleaved"),
];

/// Converts a MIME-style raw audio content-type specifier into the caps
/// descriptor forwarded to the decoder.
///
/// `audio/x-raw` (and the legacy `audio/x-raw-int`) specifiers are
/// normalized: missing attributes are filled from the 16 kHz mono S16LE
/// defaults, supplied ones override them. Any other media type is passed
/// through untouched — the decoder either understands it or rejects the
/// init.
pub fn content_type_to_caps(content_type: &str) -> String {
    let normalized = content_type.replace(';', ",");
    let (media_type, attr_string) = match normalized.split_once(',') {
        Some((m, rest)) => (m.trim(), rest),
        None => (normalized.trim(), ""),
    };

    if media_type != "audio/x-raw" && media_type != "audio/x-raw-int" {
        return content_type.to_string();
    }

    let mut attributes: BTreeMap<String, String> = DEFAULT_ATTRIBUTES
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    for pair in attr_string.split(',') {
        if let Some((key, value)) = pair.split_once('=') {
            let key = key.trim();
            if !key.is_empty() {
                attributes.insert(key.to_string(), value.trim().to_string());
            }
        }
    }

    let attrs = attributes
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("audio/x-raw, {attrs}")
}
