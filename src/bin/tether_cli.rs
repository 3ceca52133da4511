use std::{
    error::Error,
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

use clap::Parser;
use tether::{Command, Connection, config::DEFAULT_CONTROL_PORT, prompt, render};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Control address of a tether server
    #[arg(default_value_t = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_CONTROL_PORT))]
    address: SocketAddr,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let mut conn = Connection::open(cli.address)?;
    let stdio = io::stdin();
    let stdout = io::stdout();

    loop {
        let reader = stdio.lock();
        let writer = StdOut {
            inner: stdout.lock(),
        };

        let cmd = match prompt(reader, writer) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        let res = match cmd {
            Command::Exit => break,
            Command::Statement(sql) if sql.is_empty() => continue,
            Command::Statement(sql) => conn.execute_sql(&sql).map(|res| render(&res)),
            Command::Commit => conn.commit().map(|_| "committed".to_string()),
            Command::Rollback => conn.rollback().map(|_| "rolled back".to_string()),
            Command::AutoCommit(on) => conn
                .set_auto_commit(on)
                .map(|_| format!("auto-commit {}", if on { "on" } else { "off" })),
        };
        match res {
            Ok(out) => println!("{out}"),
            Err(e) => eprintln!("query error: {e}"),
        }
    }

    if let Err(e) = conn.close() {
        eprintln!("failed to close session. error: {e}");
    }
    Ok(())
}

/// Stdout wrapper that flushes content after every write.
struct StdOut<W: io::Write> {
    inner: W,
}

impl<W: io::Write> io::Write for StdOut<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res = self.inner.write(buf);
        if res.is_ok() {
            self.inner.flush()?
        }
        res
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
