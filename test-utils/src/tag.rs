//! Tag stream encoders.
//!
//! Builds the nested record format the TOC parsers read: type code, optional
//! null-terminated name, varint-sized container bodies closed by a zero byte.

use toc_parser::reader::write_varint;

fn header(code: u8, name: Option<&str>) -> Vec<u8> {
    let mut out = Vec::new();
    match name {
        Some(name) => {
            out.push(code);
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }
        None => out.push(code | 0x80),
    }
    out
}

fn container(code: u8, name: Option<&str>, body: &[Vec<u8>]) -> Vec<u8> {
    let mut inner: Vec<u8> = body.concat();
    inner.push(0);
    let mut out = header(code, name);
    out.extend_from_slice(&write_varint(inner.len() as u64));
    out.extend_from_slice(&inner);
    out
}

pub fn object(name: Option<&str>, fields: &[Vec<u8>]) -> Vec<u8> {
    container(0x02, name, fields)
}

pub fn list(name: Option<&str>, items: &[Vec<u8>]) -> Vec<u8> {
    container(0x01, name, items)
}

pub fn string(name: Option<&str>, value: &str) -> Vec<u8> {
    let mut out = header(0x07, name);
    out.extend_from_slice(&write_varint(value.len() as u64 + 1));
    out.extend_from_slice(value.as_bytes());
    out.push(0);
    out
}

pub fn boolean(name: Option<&str>, value: bool) -> Vec<u8> {
    let mut out = header(0x06, name);
    out.push(u8::from(value));
    out
}

pub fn u32(name: Option<&str>, value: u32) -> Vec<u8> {
    let mut out = header(0x08, name);
    out.extend_from_slice(&value.to_le_bytes());
    out
}

pub fn u64(name: Option<&str>, value: u64) -> Vec<u8> {
    let mut out = header(0x09, name);
    out.extend_from_slice(&value.to_le_bytes());
    out
}

pub fn guid(name: Option<&str>, value: [u8; 16]) -> Vec<u8> {
    let mut out = header(0x0f, name);
    out.extend_from_slice(&value);
    out
}

pub fn sha1(name: Option<&str>, value: [u8; 20]) -> Vec<u8> {
    let mut out = header(0x10, name);
    out.extend_from_slice(&value);
    out
}

pub fn blob(name: Option<&str>, value: &[u8]) -> Vec<u8> {
    let mut out = header(0x13, name);
    out.extend_from_slice(&write_varint(value.len() as u64));
    out.extend_from_slice(value);
    out
}
