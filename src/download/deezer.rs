//! Deezer stream retrieval and decryption.
//!
//! Deezer serves "striped" files: the stream is cut into 6144-byte chunks and
//! the first 2048 bytes of every chunk at least that long are Blowfish-CBC
//! encrypted with a per-track key. Everything else is plaintext.
//!
//! When the media API hands out no URL, a legacy CDN URL can be derived from
//! the track's hash and media version with AES-128-ECB.

use async_trait::async_trait;
use blowfish::Blowfish;
use blowfish::cipher::generic_array::GenericArray;
use blowfish::cipher::{BlockDecrypt, KeyInit};
use futures_util::StreamExt;
use md5::{Digest, Md5};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use super::constants::{DEEZER_CHUNK_SIZE, DEEZER_ENCRYPTED_PREFIX, DEEZER_MIN_AUDIO_BYTES};
use super::downloadable::Downloadable;
use super::error::DownloadError;
use super::http::{HttpClient, header_content_length, stream_body};

const BLOWFISH_SECRET: &[u8; 16] = b"g4el58wc0zvf9na1";
const BLOWFISH_IV: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
const URL_KEY: &[u8; 16] = b"jo6aey6haid2Teih";
const URL_SEPARATOR: u8 = 0xA4;

/// A Deezer track stream, decrypted on the fly when the URL requires it.
#[derive(Debug)]
pub struct DeezerDownloadable {
    http: HttpClient,
    url: String,
    track_id: String,
    extension: String,
    size: OnceCell<Option<u64>>,
}

impl DeezerDownloadable {
    #[must_use]
    pub fn new(
        http: HttpClient,
        url: impl Into<String>,
        track_id: impl Into<String>,
        extension: impl Into<String>,
        known_size: Option<u64>,
    ) -> Self {
        Self {
            http,
            url: url.into(),
            track_id: track_id.into(),
            extension: extension.into(),
            size: known_size.map_or_else(OnceCell::new, |size| OnceCell::new_with(Some(Some(size)))),
        }
    }

    /// Media and mobile CDN paths carry striped files.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.url.contains("/mobile/") || self.url.contains("/media/")
    }
}

#[async_trait]
impl Downloadable for DeezerDownloadable {
    fn extension(&self) -> &str {
        &self.extension
    }

    async fn size(&self) -> Result<Option<u64>, DownloadError> {
        self.size
            .get_or_try_init(|| self.http.content_length(&self.url))
            .await
            .copied()
    }

    #[instrument(skip(self, sink), fields(track_id = %self.track_id))]
    async fn fetch(&self, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64, DownloadError> {
        let response = self.http.get(&self.url).await?;

        if header_content_length(&response).unwrap_or(0) < DEEZER_MIN_AUDIO_BYTES {
            let body = response
                .text()
                .await
                .map_err(|e| DownloadError::network(&self.url, e))?;
            return Err(DownloadError::non_streamable(error_document_message(&body)));
        }

        if !self.is_encrypted() {
            return stream_body(response, &self.url, sink).await;
        }

        let cipher = StripeCipher::for_track(&self.track_id)?;
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::with_capacity(DEEZER_CHUNK_SIZE * 2);
        let mut written: u64 = 0;

        while let Some(bytes) = stream.next().await {
            let bytes = bytes.map_err(|e| DownloadError::network(&self.url, e))?;
            buffer.extend_from_slice(&bytes);

            // Chunk boundaries are fixed in the file, not in the transport
            while buffer.len() >= DEEZER_CHUNK_SIZE {
                let mut chunk: Vec<u8> = buffer.drain(..DEEZER_CHUNK_SIZE).collect();
                cipher.decrypt_chunk(&mut chunk);
                write(sink, &chunk).await?;
                written += chunk.len() as u64;
            }
        }

        if !buffer.is_empty() {
            cipher.decrypt_chunk(&mut buffer);
            write(sink, &buffer).await?;
            written += buffer.len() as u64;
        }

        debug!(bytes = written, "decrypted stream");
        Ok(written)
    }
}

async fn write(sink: &mut (dyn AsyncWrite + Send + Unpin), bytes: &[u8]) -> Result<(), DownloadError> {
    sink.write_all(bytes)
        .await
        .map_err(|e| DownloadError::io("<sink>", e))
}

/// Turns a short error response body into a readable message.
fn error_document_message(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => match (json.get("error"), json.get("message")) {
            (Some(error), Some(message)) => {
                format!("{} - {}", plain(error), plain(message))
            }
            _ => body.to_string(),
        },
        Err(_) if body.trim().is_empty() => "File not found.".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

fn plain(value: &serde_json::Value) -> String {
    value
        .as_str()
        .map_or_else(|| value.to_string(), str::to_string)
}

/// Blowfish-CBC over the encrypted prefix of each chunk.
struct StripeCipher {
    cipher: Blowfish,
}

impl StripeCipher {
    fn for_track(track_id: &str) -> Result<Self, DownloadError> {
        let key = blowfish_key(track_id);
        let cipher = Blowfish::new_from_slice(&key)
            .map_err(|e| DownloadError::decrypt(track_id, e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Decrypts the first 2048 bytes in place; shorter chunks are plaintext.
    fn decrypt_chunk(&self, chunk: &mut [u8]) {
        if chunk.len() < DEEZER_ENCRYPTED_PREFIX {
            return;
        }
        self.decrypt_cbc(&mut chunk[..DEEZER_ENCRYPTED_PREFIX]);
    }

    fn decrypt_cbc(&self, data: &mut [u8]) {
        let mut previous = BLOWFISH_IV;
        for block in data.chunks_exact_mut(8) {
            let mut ciphertext = [0u8; 8];
            ciphertext.copy_from_slice(block);

            self.cipher
                .decrypt_block(GenericArray::from_mut_slice(block));
            for (byte, mask) in block.iter_mut().zip(previous) {
                *byte ^= mask;
            }
            previous = ciphertext;
        }
    }
}

/// Per-track Blowfish key: `md5hex[i] ^ md5hex[i + 16] ^ SECRET[i]`.
fn blowfish_key(track_id: &str) -> [u8; 16] {
    let digest = hex::encode(Md5::digest(track_id.as_bytes()));
    let digest = digest.as_bytes();
    let mut key = [0u8; 16];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = digest[i] ^ digest[i + 16] ^ BLOWFISH_SECRET[i];
    }
    key
}

/// Derives the legacy CDN URL for a track.
///
/// Returns `None` when the inputs cannot produce a URL (empty hash or id).
#[must_use]
pub fn encrypted_file_url(track_id: &str, track_hash: &str, media_version: &str) -> Option<String> {
    use aes::Aes128;
    use aes::cipher::BlockEncrypt;

    let prefix = track_hash.chars().next()?;
    if track_id.is_empty() {
        return None;
    }

    let mut url_bytes = Vec::with_capacity(track_hash.len() + track_id.len() + 16);
    for (i, part) in [track_hash, "1", track_id, media_version].iter().enumerate() {
        if i > 0 {
            url_bytes.push(URL_SEPARATOR);
        }
        url_bytes.extend_from_slice(part.as_bytes());
    }

    let url_hash = hex::encode(Md5::digest(&url_bytes));
    let mut info = Vec::with_capacity(url_hash.len() + url_bytes.len() + 18);
    info.extend_from_slice(url_hash.as_bytes());
    info.push(URL_SEPARATOR);
    info.extend_from_slice(&url_bytes);
    info.push(URL_SEPARATOR);

    // Always pads, a full block when already aligned
    let padding = 16 - info.len() % 16;
    info.resize(info.len() + padding, b'.');

    let cipher = Aes128::new(GenericArray::from_slice(URL_KEY));
    for block in info.chunks_exact_mut(16) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }

    Some(format!(
        "https://e-cdns-proxy-{prefix}.dzcdn.net/mobile/1/{}",
        hex::encode(info)
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use blowfish::cipher::BlockEncrypt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const TRACK_ID: &str = "3135556";

    fn encrypt_cbc(cipher: &Blowfish, data: &mut [u8]) {
        let mut previous = BLOWFISH_IV;
        for block in data.chunks_exact_mut(8) {
            for (byte, mask) in block.iter_mut().zip(previous) {
                *byte ^= mask;
            }
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
            previous.copy_from_slice(block);
        }
    }

    /// Encrypts a plaintext file the way the CDN stores it.
    fn stripe(plain: &[u8]) -> Vec<u8> {
        let cipher = Blowfish::new_from_slice(&blowfish_key(TRACK_ID)).unwrap();
        let mut out = plain.to_vec();
        for chunk in out.chunks_mut(DEEZER_CHUNK_SIZE) {
            if chunk.len() >= DEEZER_ENCRYPTED_PREFIX {
                encrypt_cbc(&cipher, &mut chunk[..DEEZER_ENCRYPTED_PREFIX]);
            }
        }
        out
    }

    // ==================== Key Derivation Tests ====================

    #[test]
    fn test_blowfish_key_vector() {
        assert_eq!(
            hex::encode(Md5::digest(TRACK_ID.as_bytes())),
            "29a15fc70fb278009ab6988ce9a422e8"
        );
        assert_eq!(&blowfish_key(TRACK_ID), b"llfk9f,7e%u`<d49");
    }

    #[test]
    fn test_decrypt_cbc_vector() {
        let cipher = StripeCipher::for_track(TRACK_ID).unwrap();

        let mut one_block = hex::decode("d8c0937df477e85d").unwrap();
        cipher.decrypt_cbc(&mut one_block);
        assert_eq!(one_block, b"ABCDEFGH");

        let mut two_blocks = hex::decode("d8c0937df477e85def3da75a086098e7").unwrap();
        cipher.decrypt_cbc(&mut two_blocks);
        assert_eq!(two_blocks, b"ABCDEFGHIJKLMNOP");
    }

    #[test]
    fn test_short_chunk_is_plaintext() {
        let cipher = StripeCipher::for_track(TRACK_ID).unwrap();
        let mut chunk = vec![9u8; DEEZER_ENCRYPTED_PREFIX - 1];
        cipher.decrypt_chunk(&mut chunk);
        assert!(chunk.iter().all(|b| *b == 9));
    }

    // ==================== URL Derivation Tests ====================

    #[test]
    fn test_encrypted_file_url_vector() {
        let url =
            encrypted_file_url(TRACK_ID, "c7a6ab1e0d3a7e2a5e7c9b5a0c3e1d24", "4").unwrap();
        assert_eq!(
            url,
            "https://e-cdns-proxy-c.dzcdn.net/mobile/1/f58e26b4ea78882ac18c1cc11ef8f8a4cd7dee92bce67da0b449d5d93929ed4a71abe1321186efc1db55bd41e2166ea5dfcbe059dbdc035fd68087d0fff994e3fb42f2f461fd119299cf742f4a2826b6"
        );
    }

    #[test]
    fn test_encrypted_file_url_short_inputs() {
        let url = encrypted_file_url("1", "a", "0").unwrap();
        assert_eq!(
            url,
            "https://e-cdns-proxy-a.dzcdn.net/mobile/1/26b85433317070a32276dae9fa154a6aa2ccc7a56be74c83a162f53876aba80ef1ed44f2cfc7f4a7ce0e1b316c7fe459"
        );
    }

    #[test]
    fn test_encrypted_file_url_aligned_input_gets_full_padding_block() {
        let url = encrypted_file_url("12345", "abcd", "1").unwrap();
        assert_eq!(
            url,
            "https://e-cdns-proxy-a.dzcdn.net/mobile/1/ef3cb7475f661a423596e0d72da6e2c51b9c52612a9f4727bb48ac9de2ad743112526079fb07d825880df5d9c2452c272afca94bd5f6dacc53a9391e96d6818b"
        );
    }

    #[test]
    fn test_encrypted_file_url_requires_hash() {
        assert!(encrypted_file_url(TRACK_ID, "", "4").is_none());
    }

    // ==================== Fetch Tests ====================

    #[tokio::test]
    async fn test_fetch_decrypts_striped_stream() {
        let plain: Vec<u8> = (0..(3 * DEEZER_CHUNK_SIZE + 3000))
            .map(|i| (i % 251) as u8)
            .collect();
        let body = stripe(&plain);
        assert_ne!(body, plain);

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mobile/1/track"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;

        let downloadable = DeezerDownloadable::new(
            HttpClient::new(),
            format!("{}/mobile/1/track", server.uri()),
            TRACK_ID,
            "flac",
            None,
        );
        assert!(downloadable.is_encrypted());

        let mut sink = Vec::new();
        let written = downloadable.fetch(&mut sink).await.unwrap();
        assert_eq!(written as usize, plain.len());
        assert_eq!(sink, plain);
    }

    #[tokio::test]
    async fn test_fetch_plain_url_passes_through() {
        let plain = vec![5u8; 25_000];
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(plain.clone()))
            .mount(&server)
            .await;

        let downloadable =
            DeezerDownloadable::new(HttpClient::new(), server.uri(), TRACK_ID, "mp3", None);
        let mut sink = Vec::new();
        downloadable.fetch(&mut sink).await.unwrap();
        assert_eq!(sink, plain);
    }

    #[tokio::test]
    async fn test_fetch_small_json_is_non_streamable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"error":"403","message":"Forbidden"}"#),
            )
            .mount(&server)
            .await;

        let downloadable = DeezerDownloadable::new(
            HttpClient::new(),
            format!("{}/media/x", server.uri()),
            TRACK_ID,
            "flac",
            None,
        );
        let mut sink = Vec::new();
        let err = downloadable.fetch(&mut sink).await.unwrap_err();
        assert!(matches!(
            err,
            DownloadError::NonStreamable { ref message } if message == "403 - Forbidden"
        ));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_error_document_message_fallbacks() {
        assert_eq!(error_document_message(""), "File not found.");
        assert_eq!(error_document_message(r#"{"code":1}"#), r#"{"code":1}"#);
    }
}
