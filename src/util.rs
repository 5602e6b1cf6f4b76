//! What's a project without a util module.

use rand::{distributions::Alphanumeric, Rng};

/// This machine's host name, handed to spawned nodes so they can dial back.
pub fn local_host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|host| host.into_string().ok())
        .unwrap_or_else(|| "localhost".into())
}

/// Generate a random string of length n.
pub fn random_string(n: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(n)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_random_string() {
        assert_eq!(random_string(12).len(), 12);
        assert!(!local_host_name().is_empty());
    }
}
