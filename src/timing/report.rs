use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Read-only snapshot of a finished attempt.
///
/// `dns_lookup`, `tcp_connection`, `tls_handshake`, `server_processing` and
/// `content_transfer` cover one phase each. `name_lookup`, `connect`,
/// `pretransfer`, `start_transfer` and `total` are measured from the start of
/// the attempt.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimingReport {
    #[serde(serialize_with = "as_millis")]
    pub dns_lookup: Duration,
    #[serde(serialize_with = "as_millis")]
    pub tcp_connection: Duration,
    #[serde(serialize_with = "as_millis")]
    pub tls_handshake: Duration,
    #[serde(serialize_with = "as_millis")]
    pub server_processing: Duration,
    #[serde(serialize_with = "as_millis")]
    pub content_transfer: Duration,

    /// Same value as `dns_lookup`, kept for existing consumers.
    #[serde(serialize_with = "as_millis")]
    pub name_lookup: Duration,
    #[serde(serialize_with = "as_millis")]
    pub connect: Duration,
    #[serde(serialize_with = "as_millis")]
    pub pretransfer: Duration,
    #[serde(serialize_with = "as_millis")]
    pub start_transfer: Duration,
    #[serde(serialize_with = "as_millis")]
    pub total: Duration,

    pub is_tls: bool,
    pub is_reused: bool,
}

impl TimingReport {
    /// Every duration keyed by its conventional name, phases first.
    pub fn durations(&self) -> [(&'static str, Duration); 10] {
        [
            ("DNSLookup", self.dns_lookup),
            ("TCPConnection", self.tcp_connection),
            ("TLSHandshake", self.tls_handshake),
            ("ServerProcessing", self.server_processing),
            ("ContentTransfer", self.content_transfer),
            ("NameLookup", self.name_lookup),
            ("Connect", self.connect),
            ("Pretransfer", self.pretransfer),
            ("StartTransfer", self.start_transfer),
            ("Total", self.total),
        ]
    }

    pub fn timeline(&self) -> Timeline<'_> {
        Timeline(self)
    }

    fn columns(&self) -> Vec<Column> {
        let mut columns = vec![
            Column::new("DNS Lookup", self.dns_lookup, "namelookup", self.name_lookup),
            Column::new("TCP Connection", self.tcp_connection, "connect", self.connect),
        ];
        if self.is_tls {
            columns.push(Column::new(
                "TLS Handshake",
                self.tls_handshake,
                "pretransfer",
                self.pretransfer,
            ));
        }
        columns.push(Column::new(
            "Server Processing",
            self.server_processing,
            "starttransfer",
            self.start_transfer,
        ));
        columns.push(Column::new(
            "Content Transfer",
            self.content_transfer,
            "total",
            self.total,
        ));
        columns
    }
}

/// `{}` prints a single line of `Name: N ms` pairs; `{:#}` prints the
/// per-phase breakdown followed by the cumulative one.
impl fmt::Display for TimingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !f.alternate() {
            let line = self
                .durations()
                .iter()
                .map(|(name, d)| format!("{name}: {} ms", d.as_millis()))
                .collect::<Vec<_>>()
                .join(", ");
            return f.write_str(&line);
        }

        writeln!(f, "DNS lookup:        {:4} ms", self.dns_lookup.as_millis())?;
        writeln!(f, "TCP connection:    {:4} ms", self.tcp_connection.as_millis())?;
        writeln!(f, "TLS handshake:     {:4} ms", self.tls_handshake.as_millis())?;
        writeln!(f, "Server processing: {:4} ms", self.server_processing.as_millis())?;
        // A zero total means the attempt was never finalized.
        if self.total.is_zero() {
            writeln!(f, "Content transfer:     - ms")?;
        } else {
            writeln!(f, "Content transfer:  {:4} ms", self.content_transfer.as_millis())?;
        }
        writeln!(f)?;
        writeln!(f, "Name Lookup:    {:4} ms", self.name_lookup.as_millis())?;
        writeln!(f, "Connect:        {:4} ms", self.connect.as_millis())?;
        writeln!(f, "Pre Transfer:   {:4} ms", self.pretransfer.as_millis())?;
        writeln!(f, "Start Transfer: {:4} ms", self.start_transfer.as_millis())?;
        if self.total.is_zero() {
            writeln!(f, "Total:             - ms")
        } else {
            writeln!(f, "Total:          {:4} ms", self.total.as_millis())
        }
    }
}

struct Column {
    label: &'static str,
    phase: Duration,
    marker: &'static str,
    cumulative: Duration,
}

impl Column {
    fn new(label: &'static str, phase: Duration, marker: &'static str, cumulative: Duration) -> Self {
        Self {
            label,
            phase,
            marker,
            cumulative,
        }
    }

    fn width(&self) -> usize {
        self.label.len() + 4
    }
}

/// Staircase rendering of a [`TimingReport`]: one column per phase and the
/// cumulative marker under the column it closes.
pub struct Timeline<'a>(&'a TimingReport);

impl fmt::Display for Timeline<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns = self.0.columns();

        let labels: Vec<String> = columns
            .iter()
            .map(|c| format!("{:^w$}", c.label, w = c.width()))
            .collect();
        writeln!(f, " {}", labels.join(" "))?;

        let values: Vec<String> = columns
            .iter()
            .map(|c| format!("{:^w$}", millis(c.phase), w = c.width()))
            .collect();
        writeln!(f, "[{}]", values.join("|"))?;

        let mut edge = 1;
        let mut edges = Vec::with_capacity(columns.len());
        for column in &columns {
            edge += column.width() + 1;
            edges.push(edge);
        }

        for (i, column) in columns.iter().enumerate() {
            let marker = format!("{}:{}", column.marker, millis(column.cumulative));
            let mut line = format!("{:>w$}", marker, w = edges[i]);
            // Keep the pipes of the columns still to come.
            for &later in &edges[i + 1..] {
                let pad = later.saturating_sub(line.len());
                line.push_str(&format!("{:>pad$}", "|", pad = pad.max(1)));
            }
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

fn millis(d: Duration) -> String {
    format!("{}ms", d.as_millis())
}

fn as_millis<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(d.as_secs_f64() * 1000.0)
}
