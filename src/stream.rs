use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between the Unix epoch and the EBML date epoch (2001-01-01T00:00:00 UTC).
pub const EBML_EPOCH_UNIX_SECS: u64 = 978_307_200;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum VarIntError {
    #[error("stream ended {needed} byte(s) before the variable-length integer was complete")]
    UnexpectedEnd { needed: usize },
    #[error("leading byte 0x00 does not encode a length")]
    InvalidLength,
}

/// Converts an EBML date (nanoseconds relative to 2001-01-01) to a `SystemTime`.
pub fn date_to_system_time(nanos: i64) -> SystemTime {
    let epoch = UNIX_EPOCH + Duration::from_secs(EBML_EPOCH_UNIX_SECS);
    let offset = Duration::from_nanos(nanos.unsigned_abs());
    if nanos < 0 {
        epoch - offset
    } else {
        epoch + offset
    }
}

pub mod parse {
    use std::mem::size_of;

    use nom::{
        bytes::streaming::take as take_bytes, number::streaming::be_u8, Err, IResult, Needed,
    };

    use super::VarIntError;

    /// Number of zero bits before the first set bit; 8 for `0x00`.
    pub fn num_preceding_zeros(byte: u8) -> usize {
        byte.leading_zeros() as usize
    }

    /// Total encoded length of a vint, judged from its leading byte.
    pub fn vint_length(leading: u8) -> Result<usize, VarIntError> {
        match num_preceding_zeros(leading) {
            8 => Err(VarIntError::InvalidLength),
            zeros => Ok(zeros + 1),
        }
    }

    /// Decodes one variable-length integer, returning its value (marker bit
    /// cleared) and the number of bytes it occupied.
    pub fn vint(input: &[u8]) -> IResult<&[u8], (u64, usize), ()> {
        let (rest, leading) = be_u8::<_, ()>(input)?;
        let zeros = num_preceding_zeros(leading);
        if zeros >= size_of::<u64>() {
            return Err(Err::Failure(()));
        }
        let (rest, tail) = take_bytes::<_, _, ()>(zeros)(rest)?;

        let value = tail
            .iter()
            .fold(u64::from(leading & (0x7F >> zeros)), |acc, &byte| {
                (acc << 8) | u64::from(byte)
            });

        Ok((rest, (value, zeros + 1)))
    }

    pub fn vint_error(err: Err<()>) -> VarIntError {
        match err {
            Err::Incomplete(Needed::Size(needed)) => VarIntError::UnexpectedEnd {
                needed: needed.get(),
            },
            Err::Incomplete(Needed::Unknown) => VarIntError::UnexpectedEnd { needed: 1 },
            Err::Error(()) | Err::Failure(()) => VarIntError::InvalidLength,
        }
    }

    /// True if every value bit of a vint of `length` bytes is set, which EBML
    /// reserves to mean "size unknown".
    pub fn is_unknown_size(value: u64, length: usize) -> bool {
        value == (1u64 << (7 * length)) - 1
    }

    fn parse_length<'a>(input: &'a [u8], buffer: &mut [u8]) -> IResult<&'a [u8], (), ()> {
        let (input, bytes) = take_bytes::<_, _, ()>(buffer.len())(input)?;
        buffer.copy_from_slice(bytes);

        Ok((input, ()))
    }

    pub fn uint(input: &[u8], length: usize) -> IResult<&[u8], u64, ()> {
        if length > size_of::<u64>() {
            return Err(Err::Error(()));
        }

        let mut buffer = [0u8; size_of::<u64>()];
        let i0 = size_of::<u64>() - length;
        let (input, _) = parse_length(input, &mut buffer[i0..])?;

        Ok((input, u64::from_be_bytes(buffer)))
    }

    pub fn int(input: &[u8], length: usize) -> IResult<&[u8], i64, ()> {
        if length > size_of::<i64>() {
            return Err(Err::Error(()));
        }

        // sign-extend from the high bit of the first payload byte
        let buffer_fill = match input.first() {
            Some(byte) if length > 0 && byte & 0x80 != 0 => 0xFF,
            _ => 0x00,
        };
        let mut buffer = [buffer_fill; size_of::<i64>()];
        let i0 = size_of::<i64>() - length;
        let (input, _) = parse_length(input, &mut buffer[i0..])?;

        Ok((input, i64::from_be_bytes(buffer)))
    }

    pub fn float(input: &[u8], length: usize) -> IResult<&[u8], f64, ()> {
        match length {
            0 => Ok((input, 0.0)),
            4 => {
                let mut buffer = [0u8; size_of::<f32>()];
                let (input, _) = parse_length(input, &mut buffer)?;
                Ok((input, f64::from(f32::from_be_bytes(buffer))))
            }
            8 => {
                let mut buffer = [0u8; size_of::<f64>()];
                let (input, _) = parse_length(input, &mut buffer)?;
                Ok((input, f64::from_be_bytes(buffer)))
            }
            _ => Err(Err::Error(())),
        }
    }

    /// Raw string bytes with trailing NUL padding removed.
    pub fn string(input: &[u8], length: usize) -> IResult<&[u8], &[u8], ()> {
        let (input, bytes) = take_bytes::<_, _, ()>(length)(input)?;
        let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);

        Ok((input, &bytes[..end]))
    }

    pub fn date(input: &[u8], length: usize) -> IResult<&[u8], i64, ()> {
        match length {
            0 => Ok((input, 0)),
            8 => int(input, length),
            _ => Err(Err::Error(())),
        }
    }

    pub fn binary(input: &[u8], length: usize) -> IResult<&[u8], &[u8], ()> {
        take_bytes(length)(input)
    }

}
