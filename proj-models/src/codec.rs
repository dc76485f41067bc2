use std::io::{Read, Write};

/// A trait for encoding and decoding a fixed-size data.
pub trait Codec {
    type Deserialized: Sized;
    const SIZE_IN_BYTES: usize;
    fn size_in_bytes() -> usize {
        Self::SIZE_IN_BYTES
    }
    fn to_bytes<W: Write>(&self, writer: W) -> std::io::Result<()>;
    fn from_bytes<R: Read>(reader: R) -> std::io::Result<Self::Deserialized>;
    fn repeat_write_till_end<'a, W, I>(mut writer: W, iter: I) -> std::io::Result<()>
    where
        W: Write,
        I: IntoIterator<Item = &'a Self>,
        Self: Sized + 'a,
    {
        for item in iter {
            item.to_bytes(writer.by_ref())?;
        }
        Ok(())
    }
    fn repeat_read_till_end<R: Read>(reader: R) -> ReadTillEndIterator<Self, R>
    where
        Self: Sized,
    {
        ReadTillEndIterator {
            reader,
            _phantom: std::marker::PhantomData,
        }
    }
}

#[macro_export]
macro_rules! impl_codec {
    ($struct:ident, $($field:ident, $field_type:ty),+) => {
        impl $crate::codec::Codec for $struct {
            type Deserialized = Self;

            const SIZE_IN_BYTES: usize =
                {$(<$field_type as $crate::codec::Codec>::SIZE_IN_BYTES+)*0};

            fn to_bytes<W: std::io::Write>(&self, mut writer: W) -> std::io::Result<()> {
                $($crate::codec::Codec::to_bytes(&self.$field, &mut writer)?;)*
                Ok(())
            }

            fn from_bytes<R: std::io::Read>(mut reader: R) -> std::io::Result<Self::Deserialized> {
                Ok(Self {
                    $($field: <$field_type as $crate::codec::Codec>::from_bytes(&mut reader)?),*
                })
            }
        }
    };
}

macro_rules! impl_codec_for_primitive {
    ($t:ty) => {
        impl Codec for $t {
            type Deserialized = $t;

            const SIZE_IN_BYTES: usize = std::mem::size_of::<$t>();

            fn to_bytes<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
                writer.write_all(&self.to_le_bytes())
            }

            fn from_bytes<R: Read>(mut reader: R) -> std::io::Result<Self::Deserialized> {
                let mut buf = [0; std::mem::size_of::<$t>()];
                reader.read_exact(&mut buf)?;
                Ok(<$t>::from_le_bytes(buf))
            }
        }
    };
}

impl_codec_for_primitive!(u32);
impl_codec_for_primitive!(u64);
impl_codec_for_primitive!(f64);

pub struct ReadTillEndIterator<T: Codec, R: Read> {
    reader: R,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: Codec, R: Read> Iterator for ReadTillEndIterator<T, R> {
    type Item = std::io::Result<T::Deserialized>;

    fn next(&mut self) -> Option<Self::Item> {
        match T::from_bytes(&mut self.reader) {
            Ok(v) => Some(Ok(v)),
            Err(e) => {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    None
                } else {
                    Some(Err(e))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {

    use super::Codec;
    use crate::Request;

    #[derive(Debug, PartialEq)]
    struct Sample {
        at: f64,
        count: u32,
    }

    impl_codec!(Sample, at, f64, count, u32);

    #[test]
    fn test_request_size() {
        assert_eq!(Request::SIZE_IN_BYTES, 24);
        assert_eq!(Sample::size_in_bytes(), 12);
    }

    #[test]
    fn test_repeat_read_write() {
        let requests = (0..100)
            .map(|i| Request::from((i as f64 * 0.5, i + 1, 64 * i)))
            .collect::<Vec<_>>();
        let mut buf = Vec::new();
        Request::repeat_write_till_end(&mut buf, &requests).unwrap();
        assert_eq!(buf.len(), 100 * Request::SIZE_IN_BYTES);
        let read = Request::repeat_read_till_end(std::io::Cursor::new(buf))
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(requests, read);
    }

    #[test]
    fn test_truncated_record_is_end_of_stream() {
        let mut buf = Vec::new();
        Sample { at: 1.5, count: 3 }.to_bytes(&mut buf).unwrap();
        buf.extend_from_slice(&[0, 1, 2]);
        let read = Sample::repeat_read_till_end(buf.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(read, vec![Sample { at: 1.5, count: 3 }]);
    }
}
