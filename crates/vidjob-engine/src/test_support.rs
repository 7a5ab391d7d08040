//! Throwaway HTTP endpoint for exercising fetch and upload paths.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};

use reqwest::blocking::Client as HttpClient;

#[derive(Debug, Clone, Default)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub struct CannedServer {
    pub base_url: String,
    handle: JoinHandle<io::Result<CapturedRequest>>,
}

impl CannedServer {
    /// Serves exactly one request with the given status and body.
    pub fn start(status: u16, body: &[u8]) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let base_url = format!("http://{}", listener.local_addr()?);
        let body = body.to_vec();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept()?;
            let mut reader = BufReader::new(stream.try_clone()?);
            let captured = read_request(&mut reader)?;
            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status} Canned\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
                body.len()
            )?;
            stream.write_all(&body)?;
            stream.flush()?;
            Ok(captured)
        });
        Ok(Self { base_url, handle })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn finish(self) -> CapturedRequest {
        self.handle
            .join()
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default()
    }
}

/// A client that ignores proxy settings so loopback requests stay local.
pub fn local_client() -> HttpClient {
    HttpClient::builder()
        .no_proxy()
        .build()
        .expect("local http client")
}

fn read_request(reader: &mut impl BufRead) -> io::Result<CapturedRequest> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        if let Some((key, value)) = trimmed.split_once(':') {
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    let length = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;

    Ok(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}
