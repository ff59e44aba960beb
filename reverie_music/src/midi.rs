// MIDI output for melodies and arrangements.
//
// Writes Standard MIDI Files (format 1): a tempo track followed by one track
// per role. Each role track carries its name, program change, channel volume
// (CC7), and pan (CC10) before the notes. Notes are written as timed
// on/off pairs sorted by tick, so overlapping notes in one track (harmony
// dyads) are fine. These files are the pipeline's stage checkpoints and the
// input handed to the synthesis engine.
//
// Uses the `midly` crate. Ticks map one-to-one onto MIDI ticks (480 PPQ).

use crate::arrangement::{Arrangement, Role, Track as RoleTrack};
use crate::error::MusicError;
use crate::melody::Melody;
use crate::note::{Note, TICKS_PER_BEAT};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use std::path::Path;

const CC_VOLUME: u8 = 7;
const CC_PAN: u8 = 10;

/// Write a bare melody (acoustic grand piano, channel 0).
pub fn write_melody_midi(melody: &Melody, path: &Path) -> Result<(), MusicError> {
    write_smf(&melody_to_smf(melody), path)
}

/// Write every track of an arrangement.
pub fn write_arrangement_midi(arrangement: &Arrangement, path: &Path) -> Result<(), MusicError> {
    write_smf(&arrangement_to_smf(arrangement), path)
}

/// Encode an arrangement to SMF bytes.
pub fn encode_arrangement(arrangement: &Arrangement) -> Result<Vec<u8>, MusicError> {
    encode(&arrangement_to_smf(arrangement))
}

fn encode(smf: &Smf<'_>) -> Result<Vec<u8>, MusicError> {
    let mut buf = Vec::new();
    smf.write_std(&mut buf)
        .map_err(|e| MusicError::Midi(e.to_string()))?;
    Ok(buf)
}

fn write_smf(smf: &Smf<'_>, path: &Path) -> Result<(), MusicError> {
    let buf = encode(smf)?;
    std::fs::write(path, &buf).map_err(|e| MusicError::io(path, e))
}

fn melody_to_smf(melody: &Melody) -> Smf<'static> {
    let mut smf = new_smf(melody.tempo_bpm);
    smf.tracks.push(note_track("Melody", 0, 0, 1.0, 0.0, &melody.notes));
    smf
}

fn arrangement_to_smf(arrangement: &Arrangement) -> Smf<'static> {
    let mut smf = new_smf(arrangement.tempo_bpm());
    for track in &arrangement.tracks {
        smf.tracks.push(role_track(track));
    }
    smf
}

fn new_smf(tempo_bpm: f64) -> Smf<'static> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_BEAT as u16)),
    ));

    // Track 0: tempo track
    let tempo_microseconds = (60_000_000.0 / tempo_bpm).round().clamp(1.0, 16_777_215.0) as u32;
    smf.tracks.push(vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo_microseconds))),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::TimeSignature(4, 2, 24, 8)),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]);
    smf
}

fn role_track(track: &RoleTrack) -> Track<'static> {
    let name = match track.role {
        Role::Melody => "Melody",
        Role::Harmony => "Harmony",
        Role::Bass => "Bass",
        Role::Texture => "Texture",
    };
    note_track(
        name,
        track.channel,
        track.program,
        track.volume,
        track.pan,
        &track.notes,
    )
}

fn midi7(v: u8) -> u7 {
    u7::new(v.min(127))
}

fn note_track(
    name: &'static str,
    channel: u8,
    program: u8,
    volume: f64,
    pan: f64,
    notes: &[Note],
) -> Track<'static> {
    let channel = u4::new(channel.min(15));
    let mut track: Track<'static> = Vec::new();

    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::TrackName(name.as_bytes())),
    });
    let setup = [
        MidiMessage::ProgramChange {
            program: midi7(program),
        },
        MidiMessage::Controller {
            controller: midi7(CC_VOLUME),
            value: midi7((volume.clamp(0.0, 1.0) * 127.0).round() as u8),
        },
        MidiMessage::Controller {
            controller: midi7(CC_PAN),
            value: midi7((64.0 + pan.clamp(-1.0, 1.0) * 63.0).round() as u8),
        },
    ];
    for message in setup {
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi { channel, message },
        });
    }

    // (tick, is_on, pitch, velocity); offs sort before ons at the same tick.
    let mut events: Vec<(u32, bool, u8, u8)> = Vec::with_capacity(notes.len() * 2);
    for n in notes {
        events.push((n.start, true, n.pitch, n.velocity));
        events.push((n.end(), false, n.pitch, 0));
    }
    events.sort_by_key(|&(tick, on, pitch, _)| (tick, on, pitch));

    let mut last_tick = 0;
    for (tick, on, pitch, velocity) in events {
        let message = if on {
            MidiMessage::NoteOn {
                key: midi7(pitch),
                vel: midi7(velocity.max(1)),
            }
        } else {
            MidiMessage::NoteOff {
                key: midi7(pitch),
                vel: u7::new(0),
            }
        };
        track.push(TrackEvent {
            delta: u28::new(tick - last_tick),
            kind: TrackEventKind::Midi { channel, message },
        });
        last_tick = tick;
    }

    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    track
}
