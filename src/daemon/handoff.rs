//! Parent/child handoff over the daemon child's standard streams
//!
//! The parent writes the password to the child's stdin and closes it, the
//! child reads it to end of stream exactly once. Once the child owns the PID
//! marker it acknowledges with `ready <pid>` on its stdout, and only then
//! does the parent exit.

use std::io::{self, BufRead, BufReader, Read, Write};
use thiserror::Error;

const ACK_PREFIX: &str = "ready";

#[derive(Error, Debug)]
pub enum AckError {
    #[error("daemon process exited before confirming startup")]
    Closed,
    #[error("unexpected acknowledgement from daemon process: {0:?}")]
    Malformed(String),
    #[error("failed to read acknowledgement: {0}")]
    Io(#[from] io::Error),
}

/// Write the password and close the channel
pub fn send_credential<W: Write>(mut channel: W, password: &str) -> io::Result<()> {
    channel.write_all(password.as_bytes())?;
    channel.flush()
}

/// Read the password verbatim until the parent closes the channel
pub fn receive_credential(channel: &mut dyn Read) -> io::Result<String> {
    let mut password = String::new();
    channel.read_to_string(&mut password)?;
    Ok(password)
}

pub fn send_ack<W: Write>(channel: &mut W, pid: u32) -> io::Result<()> {
    writeln!(channel, "{} {}", ACK_PREFIX, pid)?;
    channel.flush()
}

/// Block until the child confirms, returning the pid it reported
pub fn await_ack<R: Read>(channel: R) -> Result<u32, AckError> {
    let mut line = String::new();
    if BufReader::new(channel).read_line(&mut line)? == 0 {
        return Err(AckError::Closed);
    }

    line.trim_end()
        .strip_prefix(ACK_PREFIX)
        .and_then(|rest| rest.trim().parse().ok())
        .ok_or_else(|| AckError::Malformed(line.trim_end().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_passes_verbatim() {
        let mut buf = Vec::new();
        send_credential(&mut buf, " p@ss word\n").unwrap();

        let mut channel: &[u8] = &buf;
        assert_eq!(receive_credential(&mut channel).unwrap(), " p@ss word\n");
    }

    #[test]
    fn test_ack() {
        let mut buf = Vec::new();
        send_ack(&mut buf, 4242).unwrap();
        assert_eq!(buf, b"ready 4242\n");
        assert_eq!(await_ack(buf.as_slice()).unwrap(), 4242);
    }

    #[test]
    fn test_ack_closed() {
        let err = await_ack(&b""[..]).unwrap_err();
        assert!(matches!(err, AckError::Closed));
    }

    #[test]
    fn test_ack_malformed() {
        assert!(matches!(
            await_ack(&b"panicked at main.rs\n"[..]).unwrap_err(),
            AckError::Malformed(_)
        ));
        assert!(matches!(
            await_ack(&b"ready soon\n"[..]).unwrap_err(),
            AckError::Malformed(_)
        ));
    }
}
