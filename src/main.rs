//! Nimbus CLI - navigate and transfer files on a Cloud9 server

mod cli;

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use nimbus::protocol::{self, fd_mode, status};
use nimbus::tls::TlsTransport;
use nimbus::transport::{BufferedTransport, TcpTransport, Transport};
use nimbus::{path, CloudClient, Error, Node, NodeType, TransferControl};

use cli::{Args, Command};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let raw: Box<dyn Transport> = if args.tls {
        Box::new(TlsTransport::connect(&args.host, args.port).context("tls connect")?)
    } else {
        Box::new(TcpTransport::connect(&args.host, args.port).context("connect")?)
    };
    let transport = Box::new(BufferedTransport::new(raw, protocol::SEND_BUFFER_SIZE));

    let client = CloudClient::connect(transport, &args.login, prompt_password)
        .map_err(describe_err)
        .context("session setup")?;

    let outcome = run(&client, &args.command);
    client.disconnect();
    outcome
}

fn prompt_password() -> String {
    if let Ok(p) = std::env::var("NIMBUS_PASSWORD") {
        return p;
    }
    dialoguer::Password::new()
        .with_prompt("Password")
        .interact()
        .unwrap_or_default()
}

/// Fold protocol status codes into the message so users see "forbidden"
/// instead of a bare number.
fn describe_err(e: Error) -> anyhow::Error {
    match e {
        Error::Request { status: code } => {
            anyhow::anyhow!("server refused: {} (status {code})", status::describe(code))
        }
        other => anyhow::Error::new(other),
    }
}

fn run(client: &CloudClient, command: &Command) -> Result<()> {
    match command {
        Command::Home { user } => {
            let node = client.get_home(user.as_deref().unwrap_or("")).map_err(describe_err)?;
            println!("#{node}");
        }
        Command::Ls { path } => {
            let dir = path::resolve(client, path).map_err(describe_err)?;
            let mut entries = client.read_directory(dir).map_err(describe_err)?;
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            for entry in entries {
                let info = client.get_node_info(entry.node).map_err(describe_err)?;
                let kind = match info.node_type {
                    NodeType::Directory => "d",
                    NodeType::File => "-",
                };
                println!("{kind}{} {:>12}  {}", info.rights, info.size, entry.name);
            }
        }
        Command::Stat { path } => {
            let node = path::resolve(client, path).map_err(describe_err)?;
            let info = client.get_node_info(node).map_err(describe_err)?;
            let owner = client.get_node_owner(node).map_err(describe_err)?;
            let group = client.get_node_group(node).map_err(describe_err)?;
            println!("node   #{node}");
            println!("type   {:?}", info.node_type);
            println!("size   {}", info.size);
            println!("rights {}", info.rights);
            println!("owner  {owner}");
            println!("group  {group}");
        }
        Command::Mkdir { path } => {
            let (parent, name) = path::split_leaf(path).map_err(describe_err)?;
            let parent = path::resolve(client, parent).map_err(describe_err)?;
            let node = client
                .make_node(parent, name, NodeType::Directory)
                .map_err(describe_err)?;
            println!("#{node}");
        }
        Command::Rm { path, recursive } => {
            let node = path::resolve(client, path).map_err(describe_err)?;
            if *recursive {
                remove_tree(client, node).map_err(describe_err)?;
            } else {
                client.remove_node(node).map_err(describe_err)?;
            }
        }
        Command::Mv { src, dest_dir } => {
            let node = path::resolve(client, src).map_err(describe_err)?;
            let dest = path::resolve(client, dest_dir).map_err(describe_err)?;
            client.move_node(node, dest).map_err(describe_err)?;
        }
        Command::Rename { path, new_name } => {
            let node = path::resolve(client, path).map_err(describe_err)?;
            client.rename_node(node, new_name).map_err(describe_err)?;
        }
        Command::Get { remote, local } => {
            let node = path::resolve(client, remote).map_err(describe_err)?;
            download(client, node, local)?;
        }
        Command::Put { local, dest_dir } => {
            let dest = path::resolve(client, dest_dir).map_err(describe_err)?;
            upload(client, local, dest)?;
        }
        Command::Members => {
            for member in client.group_list().map_err(describe_err)? {
                println!("{member}");
            }
        }
        Command::Invite { user } => client.group_invite(user).map_err(describe_err)?,
        Command::Kick { user } => client.group_kick(user).map_err(describe_err)?,
    }
    Ok(())
}

/// Bottom-up recursive delete; directory listings drive further requests
/// on the same session.
fn remove_tree(client: &CloudClient, node: Node) -> nimbus::Result<()> {
    let info = client.get_node_info(node)?;
    if info.node_type == NodeType::Directory {
        for entry in client.read_directory(node)? {
            remove_tree(client, entry.node)?;
        }
    }
    client.remove_node(node)
}

fn byte_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(
            "{bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

/// Wire Ctrl-C to transfer cancellation for this process.
fn cancel_on_interrupt(ctl: &Arc<TransferControl>) {
    let ctl = Arc::clone(ctl);
    let _ = ctrlc::set_handler(move || {
        eprintln!("\nInterrupted, cancelling transfer...");
        ctl.cancel();
    });
}

fn download(client: &CloudClient, node: Node, local: &Path) -> Result<()> {
    let info = client.get_node_info(node).map_err(describe_err)?;
    if info.node_type != NodeType::File {
        anyhow::bail!("not a file");
    }

    // Bulk I/O runs on its own session so interactive requests elsewhere
    // on this connection are not stuck behind it.
    let data = client.fork().map_err(describe_err).context("open data session")?;
    let ctl = TransferControl::new();
    cancel_on_interrupt(&ctl);

    let fd = data.open_fd(node, fd_mode::READ).map_err(describe_err)?;
    // Touch the local filesystem only once the server has granted the
    // read; a refused open must not leave an empty file behind.
    let mut out = File::create(local)
        .with_context(|| format!("create {}", local.display()))?;
    let bar = byte_bar(info.size);
    let copied = data.long_read_fd(fd, info.size, &ctl, |chunk| {
        out.write_all(chunk)?;
        bar.inc(chunk.len() as u64);
        Ok(())
    });
    let _ = data.close_fd(fd);
    data.disconnect();

    match copied {
        Ok(n) => {
            bar.finish();
            println!("{} bytes -> {}", n, local.display());
            Ok(())
        }
        Err(Error::Cancelled) => {
            bar.abandon();
            let _ = std::fs::remove_file(local);
            anyhow::bail!("transfer cancelled");
        }
        Err(e) => {
            bar.abandon();
            Err(describe_err(e))
        }
    }
}

fn upload(client: &CloudClient, local: &Path, dest: Node) -> Result<()> {
    let name = local
        .file_name()
        .and_then(|n| n.to_str())
        .context("local file needs a UTF-8 name")?;
    let size = local
        .metadata()
        .with_context(|| format!("stat {}", local.display()))?
        .len();
    let mut input = File::open(local)
        .with_context(|| format!("open {}", local.display()))?;

    let data = client.fork().map_err(describe_err).context("open data session")?;
    let ctl = TransferControl::new();
    cancel_on_interrupt(&ctl);

    let node = data
        .make_node(dest, name, NodeType::File)
        .map_err(describe_err)?;
    let bar = byte_bar(size);

    let fd = data.open_fd(node, fd_mode::WRITE).map_err(describe_err)?;
    let copied = data.long_write_fd(fd, size, &ctl, |buf| {
        let n = input.read(buf)?;
        bar.inc(n as u64);
        Ok(n)
    });
    let _ = data.close_fd(fd);
    data.disconnect();

    match copied {
        Ok(n) => {
            bar.finish();
            println!("{} bytes -> #{node}", n);
            Ok(())
        }
        Err(Error::Cancelled) => {
            bar.abandon();
            anyhow::bail!("transfer cancelled");
        }
        Err(e) => {
            bar.abandon();
            Err(describe_err(e))
        }
    }
}
