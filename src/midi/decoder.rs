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
use std::collections::BTreeSet;
use std::error::Error;
use std::fs;
use std::path::Path;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

/// The conversion factor used when the source file yields no usable
/// microseconds-per-tick.
const DEFAULT_MICROS_PER_TICK: f64 = 5000.0;

/// The tempo assumed until the file declares one, in microseconds per beat.
const DEFAULT_MICROS_PER_BEAT: f64 = 500_000.0;

/// A decoded event with its absolute tick timestamp and source track.
#[derive(Clone, Debug)]
pub struct RawEvent {
    /// The index of the source track the event came from.
    pub track: usize,
    /// The absolute timestamp in ticks.
    pub tick: u64,
    /// What the event carries.
    pub kind: EventKind,
}

#[derive(Clone, Debug)]
pub enum EventKind {
    NoteOn { channel: u8, pitch: u8, velocity: u8 },
    NoteOff { channel: u8, pitch: u8 },
    ProgramChange { channel: u8, program: u8 },
    Tempo { micros_per_beat: u32 },
    TimeSignature { numerator: u8, denominator: u8 },
}

/// The declared structure of one source track.
#[derive(Clone, Debug)]
pub struct TrackInfo {
    /// The index of the track in the source file.
    pub index: usize,
    /// The track's name, empty if the file doesn't name it.
    pub name: String,
    /// The channels the track plays notes on, ascending.
    pub channels: Vec<u8>,
}

/// A fully decoded MIDI file: static structure plus the chronological event
/// stream.
#[derive(Clone, Debug)]
pub struct DecodedFile {
    /// The tick-to-time conversion factor.
    pub micros_per_tick: f64,
    /// The declared track/channel structure.
    pub track_infos: Vec<TrackInfo>,
    /// All events in tick order.
    pub events: Vec<RawEvent>,
}

/// Decodes the MIDI file at the given path. Any structural error in the file
/// fails the whole decode.
pub fn decode(path: &Path) -> Result<DecodedFile, Box<dyn Error>> {
    let bytes = fs::read(path)?;
    let smf = Smf::parse(&bytes)?;

    let mut track_infos = Vec::with_capacity(smf.tracks.len());
    let mut events = Vec::new();

    for (index, track) in smf.tracks.iter().enumerate() {
        let mut name = String::new();
        let mut channels: BTreeSet<u8> = BTreeSet::new();
        let mut tick: u64 = 0;

        for event in track {
            tick += u64::from(event.delta.as_int());
            match event.kind {
                TrackEventKind::Midi { channel, message } => {
                    let channel = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } => {
                            channels.insert(channel);
                            events.push(RawEvent {
                                track: index,
                                tick,
                                kind: EventKind::NoteOn {
                                    channel,
                                    pitch: key.as_int(),
                                    velocity: vel.as_int(),
                                },
                            });
                        }
                        MidiMessage::NoteOff { key, .. } => {
                            channels.insert(channel);
                            events.push(RawEvent {
                                track: index,
                                tick,
                                kind: EventKind::NoteOff {
                                    channel,
                                    pitch: key.as_int(),
                                },
                            });
                        }
                        MidiMessage::ProgramChange { program } => {
                            events.push(RawEvent {
                                track: index,
                                tick,
                                kind: EventKind::ProgramChange {
                                    channel,
                                    program: program.as_int(),
                                },
                            });
                        }
                        _ => {}
                    }
                }
                TrackEventKind::Meta(MetaMessage::TrackName(bytes)) => {
                    if name.is_empty() {
                        name = String::from_utf8_lossy(bytes).to_string();
                    }
                }
                TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => {
                    events.push(RawEvent {
                        track: index,
                        tick,
                        kind: EventKind::Tempo {
                            micros_per_beat: tempo.as_int(),
                        },
                    });
                }
                TrackEventKind::Meta(MetaMessage::TimeSignature(
                    numerator,
                    denominator,
                    _,
                    _,
                )) => {
                    events.push(RawEvent {
                        track: index,
                        tick,
                        kind: EventKind::TimeSignature {
                            numerator,
                            denominator,
                        },
                    });
                }
                _ => {}
            }
        }

        track_infos.push(TrackInfo {
            index,
            name,
            channels: channels.into_iter().collect(),
        });
    }

    // Merge the per-track streams into one chronological stream. The sort is
    // stable, so simultaneous events keep their track order.
    events.sort_by_key(|event| event.tick);

    Ok(DecodedFile {
        micros_per_tick: micros_per_tick(&smf, &events),
        track_infos,
        events,
    })
}

/// Derives the tick-to-time conversion factor from the header timing and the
/// file's first tempo event, falling back to a fixed default when the file
/// reports nothing usable.
fn micros_per_tick(smf: &Smf, events: &[RawEvent]) -> f64 {
    let micros_per_tick = match smf.header.timing {
        Timing::Metrical(ticks_per_beat) => {
            let ticks_per_beat = f64::from(ticks_per_beat.as_int());
            if ticks_per_beat == 0.0 {
                return DEFAULT_MICROS_PER_TICK;
            }
            let micros_per_beat = events
                .iter()
                .find_map(|event| match event.kind {
                    EventKind::Tempo { micros_per_beat } => Some(f64::from(micros_per_beat)),
                    _ => None,
                })
                .unwrap_or(DEFAULT_MICROS_PER_BEAT);
            micros_per_beat / ticks_per_beat
        }
        Timing::Timecode(fps, subframe) => {
            1_000_000.0 / (f64::from(fps.as_f32()) * f64::from(subframe))
        }
    };

    if micros_per_tick == 0.0 {
        DEFAULT_MICROS_PER_TICK
    } else {
        micros_per_tick
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use midly::num::{u15, u24, u28, u4, u7};
    use midly::{
        Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
    };

    use super::{decode, EventKind};

    fn note_on(delta: u32, channel: u8, key: u8, vel: u8) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi {
                channel: u4::new(channel),
                message: MidiMessage::NoteOn {
                    key: u7::new(key),
                    vel: u7::new(vel),
                },
            },
        }
    }

    fn note_off(delta: u32, channel: u8, key: u8) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi {
                channel: u4::new(channel),
                message: MidiMessage::NoteOff {
                    key: u7::new(key),
                    vel: u7::new(0),
                },
            },
        }
    }

    #[test]
    fn test_decode_structure_and_order() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let path = tempdir.path().join("two-tracks.mid");

        let mut smf = Smf {
            header: Header {
                format: Format::Parallel,
                timing: Timing::Metrical(u15::new(480)),
            },
            tracks: Vec::new(),
        };
        smf.tracks.push(vec![
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::TrackName(b"melody")),
            },
            note_on(10, 0, 60, 90),
            note_off(10, 0, 60),
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            },
        ]);
        smf.tracks.push(vec![
            note_on(5, 3, 40, 70),
            note_off(30, 3, 40),
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            },
        ]);
        smf.save(&path)?;

        let decoded = decode(&path)?;

        assert_eq!(2, decoded.track_infos.len());
        assert_eq!("melody", decoded.track_infos[0].name);
        assert_eq!(vec![0], decoded.track_infos[0].channels);
        assert_eq!("", decoded.track_infos[1].name);
        assert_eq!(vec![3], decoded.track_infos[1].channels);

        // No tempo event: 500000µs per beat over 480 ticks per beat.
        assert!((decoded.micros_per_tick - 500_000.0 / 480.0).abs() < 1e-9);

        // Events are merged across tracks in tick order.
        let ticks: Vec<u64> = decoded.events.iter().map(|event| event.tick).collect();
        assert_eq!(vec![5, 10, 20, 35], ticks);
        assert!(matches!(
            decoded.events[0].kind,
            EventKind::NoteOn {
                channel: 3,
                pitch: 40,
                velocity: 70
            }
        ));

        Ok(())
    }

    #[test]
    fn test_decode_zero_timing_uses_default() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let path = tempdir.path().join("zero-timing.mid");

        let mut smf = Smf {
            header: Header {
                format: Format::SingleTrack,
                timing: Timing::Metrical(u15::new(0)),
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
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            },
        ]);
        smf.save(&path)?;

        let decoded = decode(&path)?;
        assert_eq!(5000.0, decoded.micros_per_tick);

        Ok(())
    }
}
