use super::types::DidError;

const DID_KEY_PREFIX: &str = "did:key:z";
const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];
const VERKEY_SIZE: usize = 32;

pub fn is_did_key(value: &str) -> bool {
    value.starts_with(DID_KEY_PREFIX)
}

/// `verkey_to_did_key` encodes a `base58` verkey as `did:key:z<multibase(multicodec + key)>`
pub fn verkey_to_did_key(verkey: &str) -> Result<String, DidError> {
    let key = bs58::decode(verkey)
        .into_vec()
        .map_err(|err| DidError::InvalidDid(err.to_string()))?;

    if key.len() != VERKEY_SIZE {
        return Err(DidError::InvalidDid(format!("invalid verkey size: {}", key.len())));
    }

    let mut prefixed = ED25519_MULTICODEC.to_vec();
    prefixed.extend_from_slice(&key);

    Ok(format!(
        "{}{}",
        DID_KEY_PREFIX,
        bs58::encode(prefixed).into_string()
    ))
}

pub fn did_key_to_verkey(did: &str) -> Result<String, DidError> {
    let encoded = did
        .strip_prefix(DID_KEY_PREFIX)
        .ok_or(DidError::InvalidDid(did.to_string()))?;

    // a did:key may carry a fragment pointing to the key itself
    let encoded = encoded.split('#').next().unwrap_or(encoded);

    let decoded = bs58::decode(encoded)
        .into_vec()
        .map_err(|err| DidError::InvalidDid(err.to_string()))?;

    if decoded.len() != ED25519_MULTICODEC.len() + VERKEY_SIZE
        || decoded[..ED25519_MULTICODEC.len()] != ED25519_MULTICODEC
    {
        return Err(DidError::InvalidDid(format!("unsupported did:key: {}", did)));
    }

    Ok(bs58::encode(&decoded[ED25519_MULTICODEC.len()..]).into_string())
}

/// `did_from_verkey` derives the unqualified peer `DID` used in the handshake, the `base58`
/// encoding of the first 16 bytes of the verkey
pub fn did_from_verkey(verkey: &str) -> Result<String, DidError> {
    let key = bs58::decode(verkey)
        .into_vec()
        .map_err(|err| DidError::InvalidDid(err.to_string()))?;

    if key.len() != VERKEY_SIZE {
        return Err(DidError::InvalidDid(format!("invalid verkey size: {}", key.len())));
    }

    Ok(bs58::encode(&key[..16]).into_string())
}
