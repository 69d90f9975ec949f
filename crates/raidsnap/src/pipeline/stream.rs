//! Canal limitado de blocos de bytes entre produtor e compressor
//!
//! O fim do fluxo é explícito: só `PipeWriter::finish` o marca. Um escritor
//! descartado sem `finish` (produtor que falhou no meio) faz o leitor
//! receber `UnexpectedEof` em vez de um fim limpo.

use std::io::{self, Read, Write};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

enum Frame {
    Data(Vec<u8>),
    End,
}

/// Cria um par escritor/leitor com no máximo `capacity` blocos de `chunk_size` em trânsito
pub fn bounded_pipe(chunk_size: usize, capacity: usize) -> (PipeWriter, PipeReader) {
    let chunk_size = chunk_size.max(1);
    let (tx, rx) = sync_channel(capacity.max(1));

    (
        PipeWriter {
            tx,
            buffer: Vec::with_capacity(chunk_size),
            chunk_size,
        },
        PipeReader {
            rx,
            current: Vec::new(),
            offset: 0,
            ended: false,
        },
    )
}

/// Lado produtor; bloqueia quando o canal está cheio
pub struct PipeWriter {
    tx: SyncSender<Frame>,
    buffer: Vec<u8>,
    chunk_size: usize,
}

impl PipeWriter {
    fn send_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.chunk_size));
        self.send(Frame::Data(chunk))
    }

    fn send(&self, frame: Frame) -> io::Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "consumidor encerrou"))
    }

    /// Envia o bloco pendente e marca o fim do fluxo
    pub fn finish(mut self) -> io::Result<()> {
        self.send_buffer()?;
        self.send(Frame::End)
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.chunk_size - self.buffer.len();
        let n = room.min(buf.len());
        self.buffer.extend_from_slice(&buf[..n]);
        if self.buffer.len() == self.chunk_size {
            self.send_buffer()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffer()
    }
}

/// Lado consumidor
pub struct PipeReader {
    rx: Receiver<Frame>,
    current: Vec<u8>,
    offset: usize,
    ended: bool,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.offset >= self.current.len() {
            if self.ended {
                return Ok(0);
            }
            match self.rx.recv() {
                Ok(Frame::Data(chunk)) => {
                    self.current = chunk;
                    self.offset = 0;
                }
                Ok(Frame::End) => self.ended = true,
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "produtor encerrou sem finalizar o fluxo",
                    ))
                }
            }
        }

        let available = &self.current[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}
