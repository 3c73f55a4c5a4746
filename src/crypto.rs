// SPDX-License-Identifier: Apache-2.0

use rustls::crypto::CryptoProvider;
use tower::BoxError;

/// Install the process wide rustls provider unless one is already set.
pub fn init_crypto_provider() -> Result<(), BoxError> {
    if CryptoProvider::get_default().is_some() {
        return Ok(());
    }

    // Fails if another thread installed a provider first.
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && CryptoProvider::get_default().is_none()
    {
        return Err("failed to initialize crypto library".into());
    }
    Ok(())
}
