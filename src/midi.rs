// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::path::Path;

use serde::Serialize;

mod decoder;
mod reconstruct;

/// A single reconstructed note.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Note {
    /// The MIDI key number.
    pub pitch: u8,
    /// When the note starts, in converted time units.
    pub start_micros: f64,
    /// How long the note lasts.
    pub duration_micros: f64,
    /// The note-on velocity normalized to 0..1.
    pub velocity: f32,
}

/// One reconstructed track. A track corresponds to a (file track, channel)
/// pair from the source file's declared structure.
#[derive(Clone, Debug, Serialize)]
pub struct Track {
    /// The track name from the source file, possibly empty.
    pub name: String,
    /// The MIDI channel the track's events arrived on.
    pub channel: u8,
    /// The index of the track in the source file.
    pub track_index: usize,
    /// The instrument selected by the channel's last program change, or -1 if
    /// none was seen.
    pub instrument_id: i32,
    /// The number of reconstructed notes.
    pub note_count: usize,
    /// The notes, in note-on order.
    pub notes: Vec<Note>,
}

/// The reconstructed per-track note data for one source file. Track 0 is a
/// reserved fallback bucket for events with no recognized channel mapping.
#[derive(Clone, Debug, Serialize)]
pub struct TracksData {
    /// The tracks, fallback bucket first.
    pub tracks: Vec<Track>,
}

impl TracksData {
    /// The number of tracks, including the fallback bucket.
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

/// Parses a MIDI file and reconstructs its per-track note timeline. Malformed
/// files fail the parse as a whole; pairing anomalies inside a readable file
/// are logged and skipped.
pub fn parse(path: &Path) -> Result<TracksData, Box<dyn Error>> {
    let decoded = decoder::decode(path)?;
    Ok(reconstruct::reconstruct(&decoded))
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use midly::num::{u15, u24, u28, u4, u7};
    use midly::{
        Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
    };

    use super::parse;

    #[test]
    fn test_parse_reconstructs_notes() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let path = tempdir.path().join("song.mid");

        // One track on channel 2 with two notes and an instrument change.
        // 500 ticks per beat at 120 BPM makes one tick a millisecond.
        let mut smf = Smf {
            header: Header {
                format: Format::SingleTrack,
                timing: Timing::Metrical(u15::new(500)),
            },
            tracks: Vec::new(),
        };
        smf.tracks.push(vec![
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(500_000))),
            },
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::TrackName(b"lead")),
            },
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Midi {
                    channel: u4::new(2),
                    message: MidiMessage::ProgramChange {
                        program: u7::new(41),
                    },
                },
            },
            TrackEvent {
                delta: u28::new(100),
                kind: TrackEventKind::Midi {
                    channel: u4::new(2),
                    message: MidiMessage::NoteOn {
                        key: u7::new(60),
                        vel: u7::new(100),
                    },
                },
            },
            TrackEvent {
                delta: u28::new(50),
                kind: TrackEventKind::Midi {
                    channel: u4::new(2),
                    message: MidiMessage::NoteOff {
                        key: u7::new(60),
                        vel: u7::new(0),
                    },
                },
            },
            TrackEvent {
                delta: u28::new(50),
                kind: TrackEventKind::Midi {
                    channel: u4::new(2),
                    message: MidiMessage::NoteOn {
                        key: u7::new(64),
                        vel: u7::new(80),
                    },
                },
            },
            TrackEvent {
                delta: u28::new(100),
                kind: TrackEventKind::Midi {
                    channel: u4::new(2),
                    message: MidiMessage::NoteOn {
                        key: u7::new(64),
                        vel: u7::new(0),
                    },
                },
            },
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            },
        ]);
        smf.save(&path)?;

        let data = parse(&path)?;

        // The fallback bucket plus the single declared (track, channel) pair.
        assert_eq!(2, data.track_count());
        let track = &data.tracks[1];
        assert_eq!("lead", track.name);
        assert_eq!(2, track.channel);
        assert_eq!(41, track.instrument_id);
        assert_eq!(2, track.note_count);

        // One tick is 1000µs; the conversion divides by 1000.
        assert_eq!(60, track.notes[0].pitch);
        assert_eq!(100.0, track.notes[0].start_micros);
        assert_eq!(50.0, track.notes[0].duration_micros);
        assert_eq!(64, track.notes[1].pitch);
        assert_eq!(200.0, track.notes[1].start_micros);
        assert_eq!(100.0, track.notes[1].duration_micros);

        Ok(())
    }

    #[test]
    fn test_parse_malformed_file_fails() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let path = tempdir.path().join("broken.mid");
        std::fs::write(&path, b"not a midi file")?;

        assert!(parse(&path).is_err());

        Ok(())
    }
}
