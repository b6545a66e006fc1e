use crate::peer::types::ServerConfig;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Session id used when the registrar cannot be reached.
pub fn local_session_id() -> String {
    format!("anon-{}", random_id())
}

// Adds the `stun:`/`turn:` scheme to an ICE url that was configured without one.
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
    {
        config.url.clone()
    } else {
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(kind: &str, url: &str) -> ServerConfig {
        ServerConfig {
            id: "t".into(),
            r#type: kind.into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    #[test]
    fn scheme_is_added_by_server_type() {
        assert_eq!(
            add_ice_url_scheme(&server("turn", "relay.example.com:3478")),
            "turn:relay.example.com:3478"
        );
        assert_eq!(
            add_ice_url_scheme(&server("stun", "stun.example.com:19302")),
            "stun:stun.example.com:19302"
        );
    }

    #[test]
    fn existing_scheme_is_kept() {
        assert_eq!(
            add_ice_url_scheme(&server("turn", "turns:relay.example.com:5349")),
            "turns:relay.example.com:5349"
        );
    }

    #[test]
    fn local_ids_are_unique_hex() {
        let a = local_session_id();
        let b = local_session_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), "anon-".len() + 16);
    }
}
