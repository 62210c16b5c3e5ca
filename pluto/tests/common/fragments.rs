use anyhow::{bail, Result};
use std::io::Write;
use std::net::TcpStream;

use crate::common::*;

/// These fragments are not a generic IMAP client but specialized to our
/// tests: every command is hardcoded by the developer so it is clear what
/// goes on the wire and what is expected back.

pub fn connect(imap: &mut TcpStream) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];

    let read = read_lines(imap, &mut buffer, None)?;
    assert_eq!(&read[..4], &b"* OK"[..]);

    Ok(())
}

pub fn capability(imap: &mut TcpStream) -> Result<()> {
    imap.write(&b"5 capability\r\n"[..])?;

    let mut buffer: [u8; 1500] = [0; 1500];
    let read = read_lines(imap, &mut buffer, Some(&b"5 OK"[..]))?;
    let srv_msg = std::str::from_utf8(read)?;
    assert!(srv_msg.contains("IMAP4rev1"));
    assert!(srv_msg.contains("AUTH=PLAIN"));

    Ok(())
}

pub fn login(imap: &mut TcpStream) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];

    imap.write(&b"10 login alice hunter2\r\n"[..])?;

    let read = read_lines(imap, &mut buffer, None)?;
    assert_eq!(&read[..5], &b"10 OK"[..]);

    Ok(())
}

pub fn login_rejected(imap: &mut TcpStream) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];

    imap.write(&b"11 login alice wrongpass\r\n"[..])?;

    let read = read_lines(imap, &mut buffer, None)?;
    assert_eq!(&read[..5], &b"11 NO"[..]);

    Ok(())
}

pub fn noop(imap: &mut TcpStream) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];

    imap.write(&b"12 noop\r\n"[..])?;

    let read = read_lines(imap, &mut buffer, None)?;
    assert_eq!(&read[..5], &b"12 OK"[..]);

    Ok(())
}

pub fn create_mailbox(imap: &mut TcpStream, mbx: &str) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];

    let cmd = format!("15 create {}\r\n", mbx);
    imap.write(cmd.as_bytes())?;

    let read = read_lines(imap, &mut buffer, None)?;
    assert_eq!(&read[..5], &b"15 OK"[..]);

    Ok(())
}

pub fn create_mailbox_rejected(imap: &mut TcpStream, mbx: &str) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];

    let cmd = format!("16 create {}\r\n", mbx);
    imap.write(cmd.as_bytes())?;

    let read = read_lines(imap, &mut buffer, None)?;
    assert_eq!(&read[..5], &b"16 NO"[..]);

    Ok(())
}

pub fn delete_mailbox(imap: &mut TcpStream, mbx: &str) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];

    let cmd = format!("17 delete {}\r\n", mbx);
    imap.write(cmd.as_bytes())?;

    let read = read_lines(imap, &mut buffer, None)?;
    assert_eq!(&read[..5], &b"17 OK"[..]);

    Ok(())
}

pub fn delete_mailbox_rejected(imap: &mut TcpStream, mbx: &str) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];

    let cmd = format!("19 delete {}\r\n", mbx);
    imap.write(cmd.as_bytes())?;

    let read = read_lines(imap, &mut buffer, None)?;
    assert_eq!(&read[..5], &b"19 NO"[..]);

    Ok(())
}

pub fn list(imap: &mut TcpStream) -> Result<String> {
    let mut buffer: [u8; 4096] = [0; 4096];

    imap.write(&b"18 list \"\" *\r\n"[..])?;

    let read = read_lines(imap, &mut buffer, Some(&b"18 OK"[..]))?;
    Ok(std::str::from_utf8(read)?.to_string())
}

pub fn select(imap: &mut TcpStream, mbx: &str) -> Result<String> {
    let mut buffer: [u8; 4096] = [0; 4096];

    let cmd = format!("20 select {}\r\n", mbx);
    imap.write(cmd.as_bytes())?;

    let read = read_lines(imap, &mut buffer, Some(&b"20 OK"[..]))?;
    let srv_msg = std::str::from_utf8(read)?;
    assert!(srv_msg.contains("[READ-WRITE] SELECT completed"));

    Ok(srv_msg.to_string())
}

pub fn select_rejected(imap: &mut TcpStream, mbx: &str) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];

    let cmd = format!("21 select {}\r\n", mbx);
    imap.write(cmd.as_bytes())?;

    let read = read_lines(imap, &mut buffer, None)?;
    assert_eq!(&read[..5], &b"21 NO"[..]);

    Ok(())
}

pub fn append_inbox(imap: &mut TcpStream, body: &[u8]) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];

    let cmd = format!("30 append INBOX {{{}}}\r\n", body.len());
    imap.write(cmd.as_bytes())?;

    let read = read_lines(imap, &mut buffer, None)?;
    let srv_msg = std::str::from_utf8(read)?;
    assert!(srv_msg.starts_with("+ Ready for literal data"));

    imap.write(body)?;
    imap.write(&b"\r\n"[..])?;

    let read = read_lines(imap, &mut buffer, Some(&b"30 "[..]))?;
    assert_eq!(&read[..5], &b"30 OK"[..]);

    Ok(())
}

pub fn store_deleted(imap: &mut TcpStream) -> Result<String> {
    let mut buffer: [u8; 1500] = [0; 1500];

    imap.write(&b"40 store 1 +FLAGS (\\Deleted)\r\n"[..])?;

    let read = read_lines(imap, &mut buffer, Some(&b"40 OK"[..]))?;
    let srv_msg = std::str::from_utf8(read)?;
    assert!(srv_msg.contains("40 OK STORE completed"));

    Ok(srv_msg.to_string())
}

pub fn expunge(imap: &mut TcpStream) -> Result<String> {
    let mut buffer: [u8; 1500] = [0; 1500];

    imap.write(&b"50 expunge\r\n"[..])?;

    let read = read_lines(imap, &mut buffer, Some(&b"50 OK"[..]))?;
    let srv_msg = std::str::from_utf8(read)?;
    assert!(srv_msg.contains("50 OK EXPUNGE completed"));

    Ok(srv_msg.to_string())
}

pub fn logout(imap: &mut TcpStream) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];

    imap.write(&b"60 logout\r\n"[..])?;

    let read = read_lines(imap, &mut buffer, Some(&b"60 OK"[..]))?;
    let srv_msg = std::str::from_utf8(read)?;
    assert!(srv_msg.contains("* BYE"));

    Ok(())
}

pub fn bad_command(imap: &mut TcpStream) -> Result<()> {
    let mut buffer: [u8; 1500] = [0; 1500];

    // A known command in tag position: the client forgot its tag.
    imap.write(&b"select INBOX\r\n"[..])?;

    let read = read_lines(imap, &mut buffer, None)?;
    let srv_msg = std::str::from_utf8(read)?;
    if !srv_msg.starts_with("* BAD Received invalid IMAP command") {
        bail!("expected invalid-command rejection, got: {}", srv_msg);
    }

    Ok(())
}
