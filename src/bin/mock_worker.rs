//! Stand-in for the JS runtimes, used by the harness's integration tests.
//!
//! Accepts the command surfaces the harness uses:
//!
//! - `vgi-mock-worker build <entry> --outfile <out> --target <t> --format <f>` (bundler)
//! - `vgi-mock-worker run <file>` (bun), `vgi-mock-worker <file>` (node),
//!   `vgi-mock-worker run --allow-all <file>` (deno)
//!
//! A worker file whose name contains `http` starts an HTTP worker that prints `PORT:<n>`; any
//! other file starts a line-oriented pipe worker on stdin/stdout. Diagnostics go to stderr.
//!
//! Faults are injected by `VGI_MOCK_BEHAVIOR` or, failing that, a `// mock-behavior: <name>` line
//! in the worker file (bundles keep it): `silent` (never ready), `garbage` (malformed readiness
//! line), `crash` (exit during startup), `hang` (ignore SIGTERM and end of input), `slow` (announce
//! the port 200ms before listening), `flood` (endless output with no line break), `build-fail`
//! (bundler fails).

use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const BEHAVIOR_ENV: &str = "VGI_MOCK_BEHAVIOR";
const BEHAVIOR_MARKER: &str = "// mock-behavior:";
const MAX_LARGE: usize = 16 * 1024 * 1024;
const MAX_HEAD: usize = 64 * 1024;
const FLOOD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Normal,
    Silent,
    Garbage,
    Crash,
    Hang,
    Slow,
    Flood,
    BuildFail,
}

impl Behavior {
    fn parse(name: &str) -> Self {
        match name.trim() {
            "silent" => Behavior::Silent,
            "garbage" => Behavior::Garbage,
            "crash" => Behavior::Crash,
            "hang" => Behavior::Hang,
            "slow" => Behavior::Slow,
            "flood" => Behavior::Flood,
            "build-fail" => Behavior::BuildFail,
            _ => Behavior::Normal,
        }
    }

    /// The environment wins over a marker in `source`.
    fn resolve(source: &str) -> Self {
        if let Ok(name) = env::var(BEHAVIOR_ENV) {
            return Behavior::parse(&name);
        }
        source
            .lines()
            .find_map(|line| line.trim().strip_prefix(BEHAVIOR_MARKER))
            .map(Behavior::parse)
            .unwrap_or(Behavior::Normal)
    }
}

enum Invocation {
    Build {
        entry: String,
        outfile: String,
        target: String,
        format: String,
    },
    Run {
        file: String,
    },
}

fn parse_args(args: &[String]) -> Result<Invocation, String> {
    if args.first().map(String::as_str) == Some("build") {
        let mut entry = None;
        let mut outfile = None;
        let mut target = "browser".to_string();
        let mut format = "esm".to_string();
        let mut rest = args[1..].iter();
        while let Some(arg) = rest.next() {
            match arg.as_str() {
                "--outfile" => outfile = rest.next().cloned(),
                "--target" => target = rest.next().cloned().unwrap_or(target),
                "--format" => format = rest.next().cloned().unwrap_or(format),
                flag if flag.starts_with("--") => {}
                path => entry = Some(path.to_string()),
            }
        }
        return match (entry, outfile) {
            (Some(entry), Some(outfile)) => Ok(Invocation::Build {
                entry,
                outfile,
                target,
                format,
            }),
            _ => Err("usage: build <entry> --outfile <out>".to_string()),
        };
    }

    args.iter()
        .filter(|a| a.as_str() != "run" && !a.starts_with("--"))
        .map(|file| Invocation::Run { file: file.clone() })
        .next()
        .ok_or_else(|| "usage: [run [--allow-all]] <file>".to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let result = match parse_args(&args) {
        Ok(Invocation::Build {
            entry,
            outfile,
            target,
            format,
        }) => build(&entry, &outfile, &target, &format),
        Ok(Invocation::Run { file }) => run(&file).await,
        Err(usage) => Err((2, usage)),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err((code, message)) => {
            eprintln!("{message}");
            ExitCode::from(code)
        }
    }
}

type MockResult = Result<(), (u8, String)>;

fn build(entry: &str, outfile: &str, target: &str, format: &str) -> MockResult {
    let source = std::fs::read_to_string(entry).map_err(|e| (1, format!("error: Could not resolve: \"{entry}\" ({e})")))?;
    if Behavior::resolve(&source) == Behavior::BuildFail {
        println!("bundling {entry}");
        return Err((1, "error: Could not resolve: \"./missing-module\"".to_string()));
    }
    let bundle = format!("// mock bundle of {entry} (target={target}, format={format})\n{source}");
    std::fs::write(outfile, &bundle).map_err(|e| (1, format!("error: cannot write {outfile}: {e}")))?;
    println!("  {outfile}  {} bytes", bundle.len());
    Ok(())
}

async fn run(file: &str) -> MockResult {
    let source = std::fs::read_to_string(file).map_err(|_| (1, format!("error: Module not found \"{file}\"")))?;
    let behavior = Behavior::resolve(&source);
    match behavior {
        Behavior::Crash => return Err((3, "mock worker: simulated crash during startup".to_string())),
        Behavior::Silent => {
            eprintln!("mock worker: staying silent");
            std::future::pending::<()>().await;
        }
        Behavior::Garbage => {
            println!("Listening on http://localhost:3000");
            std::future::pending::<()>().await;
        }
        Behavior::Flood => {
            let mut stdout = tokio::io::stdout();
            let _ = stdout.write_all(&vec![b'x'; FLOOD_BYTES]).await;
            let _ = stdout.flush().await;
            std::future::pending::<()>().await;
        }
        Behavior::Hang => ignore_sigterm(),
        _ => {}
    }

    let http = Path::new(file)
        .file_name()
        .is_some_and(|name| name.to_string_lossy().contains("http"));
    if http {
        serve_http(behavior).await
    } else {
        serve_pipe(behavior).await
    }
}

#[cfg(unix)]
fn ignore_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::spawn(async move {
                while term.recv().await.is_some() {
                    eprintln!("mock worker: ignoring SIGTERM");
                }
            });
        }
        Err(e) => eprintln!("mock worker: cannot install SIGTERM handler: {e}"),
    }
}

#[cfg(not(unix))]
fn ignore_sigterm() {}

fn compression_level() -> String {
    env::var("VGI_COMPRESSION_LEVEL").unwrap_or_else(|_| "0".to_string())
}

// ============================================================================
// Pipe mode
// ============================================================================

enum Open {
    Nothing,
    Producer,
    Exchange,
}

async fn serve_pipe(behavior: Behavior) -> MockResult {
    eprintln!("mock worker: pipe mode, pid {}", std::process::id());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut open = Open::Nothing;

    while let Some(line) = lines.next_line().await.map_err(|e| (1, format!("stdin: {e}")))? {
        let (command, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        let reply = match command {
            "ping" => "pong".to_string(),
            "pid" => std::process::id().to_string(),
            "compression" => compression_level(),
            "log" => format!("LOG INFO {arg}\nok"),
            "large" => "x".repeat(arg.parse::<usize>().unwrap_or(0).min(MAX_LARGE)),
            "produce_error_on_init" => {
                open = Open::Producer;
                "OK stream".to_string()
            }
            "next" => match std::mem::replace(&mut open, Open::Nothing) {
                Open::Producer => "ERR RpcError: intentional init error".to_string(),
                _ => "ERR no open stream".to_string(),
            },
            "exchange_error_on_init" => {
                open = Open::Exchange;
                "OK session".to_string()
            }
            "exchange" => match std::mem::replace(&mut open, Open::Nothing) {
                Open::Exchange => "ERR RpcError: intentional exchange init error".to_string(),
                _ => "ERR no open session".to_string(),
            },
            "exit" => return Ok(()),
            other => format!("ERR unknown command {other:?}"),
        };
        stdout
            .write_all(format!("{reply}\n").as_bytes())
            .await
            .map_err(|e| (1, format!("stdout: {e}")))?;
        stdout.flush().await.map_err(|e| (1, format!("stdout: {e}")))?;
    }

    eprintln!("mock worker: end of input");
    if behavior == Behavior::Hang {
        std::future::pending::<()>().await;
    }
    Ok(())
}

// ============================================================================
// HTTP mode
// ============================================================================

async fn serve_http(behavior: Behavior) -> MockResult {
    let io_err = |e: std::io::Error| (1, format!("listen: {e}"));
    let listener = if behavior == Behavior::Slow {
        let port = TcpListener::bind("127.0.0.1:0")
            .await
            .and_then(|l| l.local_addr())
            .map_err(io_err)?
            .port();
        announce(port);
        tokio::time::sleep(Duration::from_millis(200)).await;
        TcpListener::bind(("127.0.0.1", port)).await.map_err(io_err)?
    } else {
        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(io_err)?;
        announce(listener.local_addr().map_err(io_err)?.port());
        listener
    };
    eprintln!("mock worker: accepting connections");

    loop {
        let (stream, _) = listener.accept().await.map_err(io_err)?;
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream).await {
                eprintln!("mock worker: connection error: {e}");
            }
        });
    }
}

fn announce(port: u16) {
    println!("PORT:{port}");
    eprintln!("mock worker: announced port {port}");
}

async fn handle_connection(mut stream: TcpStream) -> std::io::Result<()> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await? == 0 || head.len() > MAX_HEAD {
            return Ok(());
        }
        head.push(byte[0]);
    }
    let head = String::from_utf8_lossy(&head);
    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or("/").to_string();
    let content_length = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; content_length.min(MAX_HEAD)];
    stream.read_exact(&mut body).await?;

    let (status, reply) = route(&method, &path);
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
        reply.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn route(method: &str, path: &str) -> (&'static str, String) {
    match (method, path) {
        ("GET", "/ping") => ("200 OK", "pong".to_string()),
        ("GET", "/pid") => ("200 OK", std::process::id().to_string()),
        ("GET", "/compression") => ("200 OK", compression_level()),
        ("GET", "/log") => ("200 OK", "LOG INFO hello from worker\nok".to_string()),
        ("POST", "/produce_error_on_init") => ("500 Internal Server Error", "RpcError: intentional init error".to_string()),
        ("POST", "/exchange_error_on_init") => (
            "500 Internal Server Error",
            "RpcError: intentional exchange init error".to_string(),
        ),
        ("GET", large) if large.starts_with("/large/") => {
            let n = large["/large/".len()..].parse::<usize>().unwrap_or(0).min(MAX_LARGE);
            ("200 OK", "x".repeat(n))
        }
        _ => ("404 Not Found", format!("no route for {method} {path}")),
    }
}
