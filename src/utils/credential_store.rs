use keyring::Entry;

const SERVICE_NAME: &str = "sqlgate";

fn entry_for(account: &str) -> Result<Entry, keyring::Error> {
    Entry::new(SERVICE_NAME, account)
}

/// Keyring account name for a connection target.
pub fn account_name(user: &str, host: &str, port: u16) -> String {
    format!("{}@{}:{}", user, host, port)
}

/// Store a password in the OS keyring for the given account.
pub fn store_password(account: &str, password: &str) -> Result<(), String> {
    let entry = entry_for(account).map_err(|e| format!("Keyring error: {}", e))?;
    entry
        .set_password(password)
        .map_err(|e| format!("Failed to store password in keyring: {}", e))
}

/// Retrieve a password from the OS keyring for the given account.
/// Returns Ok(None) if no credential is found (not an error).
pub fn get_password(account: &str) -> Result<Option<String>, String> {
    let entry = entry_for(account).map_err(|e| format!("Keyring error: {}", e))?;
    match entry.get_password() {
        Ok(password) => Ok(Some(password)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(format!("Failed to retrieve password from keyring: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_name() {
        assert_eq!(account_name("scott", "db1", 1521), "scott@db1:1521");
    }
}
