use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use rtsp::{ClientConfig, Method, Reply, RtspClient};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rtsp-client",
    about = "Probe an RTSP server: OPTIONS, DESCRIBE and optionally GET_PARAMETER"
)]
struct Args {
    /// Stream URL (rtsp://[user:pass@]host[:port]/path)
    url: String,

    /// Application name sent in User-Agent
    #[arg(long)]
    app_name: Option<String>,

    /// Seconds to wait for each response
    #[arg(long, short, default_value_t = 10)]
    timeout: u64,

    /// Longest URL accepted
    #[arg(long, default_value_t = 2048)]
    max_url_len: usize,

    /// Also fetch this parameter with GET_PARAMETER
    #[arg(long)]
    get_parameter: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout);
    let config = ClientConfig {
        app_name: args.app_name,
        max_url_len: args.max_url_len,
        connect_timeout: timeout,
        response_timeout: Some(timeout),
        ..Default::default()
    };
    let client = RtspClient::new(&args.url, config);

    // Commands queue behind the connect and go out in this order.
    let (tx, rx) = mpsc::channel::<(Method, Reply)>();
    let mut methods = vec![Method::Options, Method::Describe];
    if args.get_parameter.is_some() {
        methods.push(Method::GetParameter);
    }
    let mut expected = 0;
    for &method in &methods {
        let tx = tx.clone();
        let handler = move |_: &RtspClient, reply: Reply| {
            let _ = tx.send((method, reply));
        };
        let cseq = match method {
            Method::GetParameter => {
                client.send_get_parameter(None, args.get_parameter.as_deref().unwrap_or(""), handler)
            }
            Method::Describe => client.send_describe(handler),
            _ => client.send_options(handler),
        };
        expected += 1;
        if cseq == 0 {
            // Failed before connecting; the reply is already queued.
            break;
        }
    }
    drop(tx);

    let mut all_ok = true;
    for _ in 0..expected {
        // The client's own deadline fires first; this only guards a stuck connect.
        let Ok((method, reply)) = rx.recv_timeout(timeout * 2) else {
            eprintln!("gave up waiting for a reply");
            all_ok = false;
            break;
        };
        all_ok &= reply.is_success();
        print_reply(method, &reply);
    }

    client.close();
    if all_ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

fn print_reply(method: Method, reply: &Reply) {
    if reply.code == 0 {
        println!("{method}: failed: {}", reply.text);
        return;
    }
    println!("{method}: {} {}", reply.code, reply.text);
    let Some(response) = &reply.response else {
        return;
    };
    match method {
        Method::Options => {
            if let Some(public) = response.get_header("Public") {
                println!("  Public: {public}");
            }
        }
        _ if !response.body.is_empty() => {
            for line in response.body_text().lines() {
                println!("  {line}");
            }
        }
        _ => {}
    }
}
