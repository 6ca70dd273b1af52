//! SOCKS5 method negotiation
//!
//! Only the no-authentication method is supported. Clients that do not
//! offer it get a `0xFF` selection and the connection is closed.

use super::consts::*;
use crate::error::SocksError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Negotiate the authentication method with the client
///
/// Reads `VER | NMETHODS | METHODS[NMETHODS]`, selects no-auth (`0x00`) if
/// offered and answers `VER | METHOD`. Any violation (wrong version, zero
/// methods, no-auth not offered) answers `0xFF` and returns the error so
/// the caller closes the connection.
pub async fn negotiate<S>(stream: &mut S) -> Result<(), SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;

    let version = header[0];
    let nmethods = header[1];

    if version != SOCKS5_VERSION {
        reject(stream).await?;
        return Err(SocksError::UnsupportedVersion(version));
    }

    if nmethods == 0 {
        reject(stream).await?;
        return Err(SocksError::NoMethodsOffered);
    }

    let mut methods = vec![0u8; nmethods as usize];
    stream.read_exact(&mut methods).await?;

    if !methods.contains(&SOCKS5_METHOD_NO_AUTH) {
        reject(stream).await?;
        return Err(SocksError::NoAcceptableMethod);
    }

    stream
        .write_all(&[SOCKS5_VERSION, SOCKS5_METHOD_NO_AUTH])
        .await?;
    stream.flush().await?;

    Ok(())
}

async fn reject<S>(stream: &mut S) -> Result<(), SocksError>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&[SOCKS5_VERSION, SOCKS5_METHOD_NO_ACCEPTABLE])
        .await?;
    stream.flush().await?;
    Ok(())
}
