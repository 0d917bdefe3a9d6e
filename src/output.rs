use std::path::PathBuf;

use csv_core::WriteResult;

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser, Clone)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write the results to this file instead of the standard output.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short='f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize results to JSON")]
    SerializeJson(#[source] serde_json::Error),
}

/// Something that can be printed as one row of a table and as one JSON object.
pub trait Record: serde::Serialize {
    const HEADERS: &'static [&'static str];
    fn cells(&self) -> Vec<String>;
}

impl Args {
    pub fn to_output(self) -> Result<Output, Error> {
        let io = match &self.output {
            None => Box::new(std::io::stdout().lock()) as Box<_>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        let formatter = match &self.format {
            Format::Table => {
                let mut comfy = comfy_table::Table::new();
                comfy.set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                Formatter::Table { comfy }
            }
            Format::Jsonl => Formatter::Jsonl,
            Format::Csv => Formatter::Csv,
        };
        Ok(Output { path: self.output, io, formatter })
    }
}

pub struct Output {
    path: Option<PathBuf>,
    io: Box<dyn std::io::Write>,
    formatter: Formatter,
}

enum Formatter {
    Csv,
    Table { comfy: comfy_table::Table },
    Jsonl,
}

/// Encodes one CSV line, quoting fields as necessary.
fn csv_line<V: AsRef<str>>(values: &[V]) -> Vec<u8> {
    let mut writer = csv_core::Writer::new();
    let mut line = Vec::new();
    let mut buffer = [0; 256];
    for (index, value) in values.iter().enumerate() {
        if index != 0 {
            let (_, written) = writer.delimiter(&mut buffer);
            line.extend_from_slice(&buffer[..written]);
        }
        let mut input = value.as_ref().as_bytes();
        loop {
            let (result, read, written) = writer.field(input, &mut buffer);
            line.extend_from_slice(&buffer[..written]);
            input = &input[read..];
            if let WriteResult::InputEmpty = result {
                break;
            }
        }
    }
    let (_, written) = writer.terminator(&mut buffer);
    line.extend_from_slice(&buffer[..written]);
    line
}

impl Output {
    /// Writes out all of `records` and flushes the output.
    pub fn records<R: Record>(mut self, records: &[R]) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv => {
                let mut data = csv_line(R::HEADERS);
                for record in records {
                    data.extend(csv_line(&record.cells()));
                }
                self.io.write_all(&data).map_err(|e| self.write_error(e))?;
            }
            Formatter::Table { comfy } => {
                comfy.set_header(R::HEADERS.to_vec());
                for record in records {
                    comfy.add_row(record.cells());
                }
                let table = comfy.to_string();
                writeln!(self.io, "{table}").map_err(|e| self.write_error(e))?;
            }
            Formatter::Jsonl => {
                for record in records {
                    serde_json::to_writer(&mut self.io, record).map_err(Error::SerializeJson)?;
                    writeln!(self.io).map_err(|e| self.write_error(e))?;
                }
            }
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.path {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.clone()),
        }
    }
}
